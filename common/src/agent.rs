/// A cooperative work unit. Agents are composed onto OS threads by the
/// runner and invoked round-robin; each call must be non-blocking and
/// bounded.
///
/// Long work is chunked: an agent that has more to do returns a non-zero
/// work count and is polled again on the next pass. Timer-driven work is
/// advanced through the `now_ms` argument rather than by reading a clock
/// internally.
pub trait Agent: Send {
    /// Performs a bounded unit of work. Returns the number of items
    /// processed (0 when idle, which lets the runner back off).
    fn poll(&mut self, now_ms: u64) -> usize;

    /// Name used in thread names and log output.
    fn name(&self) -> &str;

    /// Called once when the runner shuts the agent down.
    fn on_close(&mut self) {}
}
