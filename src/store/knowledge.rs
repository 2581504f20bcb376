use crate::types::KnowledgeItem;

/// Insertion-ordered knowledge log. Items are append-only and immutable;
/// order is part of the prompt's temporal context.
#[derive(Debug, Default, Clone)]
pub struct KnowledgeLog {
    items: Vec<KnowledgeItem>,
}

impl KnowledgeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: KnowledgeItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[KnowledgeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i, KnowledgeItem::Error { .. }))
            .count()
    }

    /// Stable textual rendering for the LLM prompt. Numbered in insertion
    /// order with the item kind tag.
    pub fn format_for_prompt(&self) -> String {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "{}. [{}] Q: {}\n   A: {}",
                    i + 1,
                    item.kind(),
                    item.question(),
                    item.body()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
