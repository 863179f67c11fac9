use std::collections::HashSet;

/// People already greeted during one capture session.
///
/// Owned by whoever runs the session; created at session start and cleared
/// (or dropped) at session end. Nothing here is shared across sessions.
#[derive(Debug, Default)]
pub struct GreetingSession {
    greeted: HashSet<String>,
}

impl GreetingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `person_id` is seen, and records it.
    pub fn should_greet(&mut self, person_id: &str) -> bool {
        if self.greeted.contains(person_id) {
            return false;
        }
        self.greeted.insert(person_id.to_string());
        true
    }

    pub fn has_greeted(&self, person_id: &str) -> bool {
        self.greeted.contains(person_id)
    }

    pub fn len(&self) -> usize {
        self.greeted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.greeted.is_empty()
    }

    pub fn clear(&mut self) {
        self.greeted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greets_once_per_session() {
        let mut session = GreetingSession::new();
        assert!(session.should_greet("p1"));
        assert!(!session.should_greet("p1"));
        assert!(session.should_greet("p2"));
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_clear_starts_fresh() {
        let mut session = GreetingSession::new();
        session.should_greet("p1");
        session.clear();
        assert!(session.is_empty());
        assert!(!session.has_greeted("p1"));
        assert!(session.should_greet("p1"));
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut a = GreetingSession::new();
        let mut b = GreetingSession::new();
        assert!(a.should_greet("p1"));
        assert!(b.should_greet("p1"));
    }
}
