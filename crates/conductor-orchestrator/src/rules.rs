use regex::Regex;

/// A lowercase term matched on word boundaries, tolerating common inflections
/// (`fix` matches "fixes" and "fixing", not "prefix").
#[derive(Debug, Clone)]
pub struct TermPattern {
    term: String,
    regex: Option<Regex>,
}

impl TermPattern {
    /// Compile a term. Falls back to substring matching if the pattern cannot compile.
    pub fn new(term: impl Into<String>) -> Self {
        let term = term.into().to_lowercase();
        let pattern = format!(r"(?i)\b{}(?:s|es|d|ed|ing)?\b", regex::escape(&term));
        Self {
            regex: Regex::new(&pattern).ok(),
            term,
        }
    }

    /// The term as written in the rule table.
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Whether the term occurs in `text`.
    pub fn matches(&self, text: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(text),
            None => text.to_lowercase().contains(&self.term),
        }
    }
}

/// One entry of a data-driven rule table: a pattern set mapped to an outcome.
#[derive(Debug, Clone)]
pub struct Rule<T> {
    /// Human-readable rule name.
    pub name: String,
    /// Terms that trigger the rule; any one suffices.
    pub patterns: Vec<TermPattern>,
    /// What the rule yields when it matches.
    pub outcome: T,
    /// Lower values are evaluated first.
    pub priority: u32,
}

impl<T> Rule<T> {
    /// Build a rule from plain terms.
    pub fn new(name: impl Into<String>, terms: &[&str], outcome: T, priority: u32) -> Self {
        Self {
            name: name.into(),
            patterns: terms.iter().map(|t| TermPattern::new(*t)).collect(),
            outcome,
            priority,
        }
    }

    /// Whether any of the rule's terms occur in `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(text))
    }

    /// Every term of this rule that occurs in `text`.
    pub fn matched_terms<'a>(&'a self, text: &str) -> Vec<&'a str> {
        self.patterns
            .iter()
            .filter(|p| p.matches(text))
            .map(TermPattern::term)
            .collect()
    }
}

/// An ordered rule table. Rules are kept sorted by priority; ties keep
/// insertion order, so precedence is explicit and auditable.
#[derive(Debug, Clone)]
pub struct RuleTable<T> {
    rules: Vec<Rule<T>>,
}

impl<T> RuleTable<T> {
    /// Build a table, ordering rules by priority.
    pub fn new(mut rules: Vec<Rule<T>>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule<T>] {
        &self.rules
    }

    /// The first rule (by priority) that matches `text`.
    pub fn first_match(&self, text: &str) -> Option<&Rule<T>> {
        self.rules.iter().find(|r| r.matches(text))
    }

    /// Every rule that matches `text`, in evaluation order.
    pub fn all_matches<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a Rule<T>> + 'a {
        self.rules.iter().filter(move |r| r.matches(text))
    }
}
