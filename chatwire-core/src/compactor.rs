use crate::message::Message;
use crate::model::ModelInfo;
use crate::token::TokenCounter;

/// Trait for compacting chat history
pub trait ChatHistoryCompactor: Send + Sync {
    /// Compacts the chat history to fit within a token budget
    ///
    /// This method should modify the history in place, removing
    /// messages as needed, and updating the token counter.
    fn compact(&self, history: &mut Vec<Message>, counter: &mut TokenCounter, max_tokens: u64);
}

/// Compactor that drops oldest messages first
///
/// The newest message is always kept, even if it alone exceeds the budget.
#[derive(Debug, Default, Clone)]
pub struct DropOldestCompactor {}

impl ChatHistoryCompactor for DropOldestCompactor {
    fn compact(&self, history: &mut Vec<Message>, counter: &mut TokenCounter, max_tokens: u64) {
        while !counter.under_budget(max_tokens) && history.len() > 1 {
            let removed = history.remove(0);
            counter.subtract_message(&removed);
        }
    }
}

/// Input budget of a model: its context window minus the output reservation
pub fn input_budget(model: &dyn ModelInfo) -> u64 {
    model
        .context_window()
        .saturating_sub(model.max_output_tokens()) as u64
}

/// Drops history until it fits the model's input budget, next to `system_prompt`
///
/// Returns the estimated tokens of what is left, system prompt included.
pub fn fit_to_context_window(
    compactor: &dyn ChatHistoryCompactor,
    model: &dyn ModelInfo,
    system_prompt: &str,
    history: &mut Vec<Message>,
) -> u64 {
    let mut counter = TokenCounter::new();
    counter.observe(system_prompt);
    for message in history.iter() {
        counter.observe_message(message);
    }
    compactor.compact(history, &mut counter, input_budget(model));
    counter.total()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn test_drop_oldest_compactor() {
        let compactor = DropOldestCompactor::default();
        let mut history = vec![
            Message::system("System message"),
            Message::user("First user message"),
            Message::assistant("First assistant message"),
        ];
        let mut counter = TokenCounter::default();
        for m in &history {
            counter.observe_message(m);
        }
        let before = counter.total();

        compactor.compact(&mut history, &mut counter, before - 1);

        assert!(history.len() < 3);
        assert!(counter.total() < before);
    }

    #[test]
    fn test_newest_message_survives() {
        let compactor = DropOldestCompactor::default();
        let mut history = vec![Message::user("a b c d e f g h")];
        let mut counter = TokenCounter::default();
        counter.observe_message(&history[0]);

        compactor.compact(&mut history, &mut counter, 0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_fit_to_context_window() {
        let model = Model {
            max_output_tokens: Some(10),
            ..Model::new("ollama", "tiny").with_context_window(16)
        };
        let mut history: Vec<Message> = (0..10)
            .map(|i| Message::user(format!("one two {i}")))
            .collect();

        let total = fit_to_context_window(&DropOldestCompactor::default(), &model, "", &mut history);

        assert!(total <= 6);
        assert_eq!(history.last().unwrap().main_text(), "one two 9");
    }
}
