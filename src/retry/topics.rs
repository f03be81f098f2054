/// `{topic}-retry-{tier}`
pub fn retry_topic(topic: &str, tier: u32) -> String {
    format!("{}-retry-{}", topic, tier)
}

/// `{topic}-dlt`
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}-dlt", topic)
}

/// Main topic plus its retry tiers and dead-letter topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    main: String,
    retry_tiers: Vec<String>,
    dead_letter: String,
}

impl TopicSet {
    /// Tiers `1..max_attempts` (one per retry)
    pub fn new(main: impl Into<String>, max_attempts: u32) -> Self {
        let main = main.into();
        let retry_tiers = (1..max_attempts.max(1))
            .map(|tier| retry_topic(&main, tier))
            .collect();
        let dead_letter = dead_letter_topic(&main);
        Self {
            main,
            retry_tiers,
            dead_letter,
        }
    }

    pub fn main(&self) -> &str {
        &self.main
    }

    pub fn dead_letter(&self) -> &str {
        &self.dead_letter
    }

    pub fn retry_tiers(&self) -> &[String] {
        &self.retry_tiers
    }

    /// Topic for retry `tier` (1-based), if that tier exists
    pub fn retry_tier(&self, tier: u32) -> Option<&str> {
        let index = tier.checked_sub(1)? as usize;
        self.retry_tiers.get(index).map(String::as_str)
    }

    /// Tier index of `topic`, `Some(0)` for the main topic
    pub fn tier_of(&self, topic: &str) -> Option<u32> {
        if topic == self.main {
            return Some(0);
        }
        self.retry_tiers
            .iter()
            .position(|t| t == topic)
            .map(|index| index as u32 + 1)
    }

    /// Streams a worker consumes: main first, then each retry tier
    pub fn consumed(&self) -> Vec<String> {
        std::iter::once(self.main.clone())
            .chain(self.retry_tiers.iter().cloned())
            .collect()
    }

    /// Every topic to provision, dead-letter topic included
    pub fn all(&self) -> Vec<String> {
        let mut topics = self.consumed();
        topics.push(self.dead_letter.clone());
        topics
    }
}
