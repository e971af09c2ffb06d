//! The prompt/response channel between the runners and the user.

/// A source of answers to interactive questions.
///
/// The CLI implements this on top of the terminal; tests drive the selection
/// and confirmation flows with scripted answers instead.
pub trait Prompt {
    /// Asks `question` and returns the answer, or `None` when the input
    /// channel is closed or the user interrupted.
    fn ask(&mut self, question: &str) -> Option<String>;
}

/// Matches the affirmative answers to a "(j/n)" question. Anything else is
/// a decline.
pub fn is_yes(answer: &str) -> bool {
    matches!(
        answer.trim().to_lowercase().as_str(),
        "j" | "ja" | "y" | "yes"
    )
}
