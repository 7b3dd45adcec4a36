//! Core traits for the session connection.

/// Message parser trait for converting raw text messages to typed messages.
///
/// A single transport message may carry any number of messages, so parsers
/// return a batch. Parsers never fail: a fragment that cannot be parsed is
/// dropped and the rest of the batch is still returned.
///
/// # Example
///
/// ```ignore
/// pub struct LineParser;
///
/// impl MessageParser<String> for LineParser {
///     fn parse(&self, text: &str) -> Vec<String> {
///         text.lines().map(str::to_owned).collect()
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse one transport message into zero or more messages, in order.
    fn parse(&self, text: &str) -> Vec<M>;
}
