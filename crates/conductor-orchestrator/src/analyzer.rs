use crate::rules::{Rule, RuleTable, TermPattern};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ambiguity removed per answered clarification question.
const CLARIFICATION_CREDIT: f64 = 0.3;

/// Discrete task complexity, 1 (simplest) to 5. This is the canonical
/// representation; the continuous 0–1 view is derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ComplexityLevel(u8);

impl ComplexityLevel {
    /// The lowest tier: simple-intent tasks.
    pub const LOWEST: ComplexityLevel = ComplexityLevel(1);
    /// Level used when no lexical signal matches.
    pub const DEFAULT: ComplexityLevel = ComplexityLevel(2);
    /// The highest tier.
    pub const HIGHEST: ComplexityLevel = ComplexityLevel(5);

    /// Build a level, `None` outside 1..=5.
    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(Self(level))
    }

    /// Derive a level from a continuous score in [0, 1].
    pub fn from_score(score: f64) -> Self {
        let clamped = if score.is_finite() { score.clamp(0.0, 1.0) } else { 0.0 };
        Self((clamped * 4.0).round() as u8 + 1)
    }

    /// The discrete value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// The continuous view: `(level - 1) / 4`.
    pub fn score(self) -> f64 {
        f64::from(self.0 - 1) / 4.0
    }

    /// Whether this is the lowest tier.
    pub fn is_lowest(self) -> bool {
        self == Self::LOWEST
    }
}

impl TryFrom<u8> for ComplexityLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("complexity level {value} outside 1..=5"))
    }
}

impl From<ComplexityLevel> for u8 {
    fn from(level: ComplexityLevel) -> u8 {
        level.0
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Families of ambiguity indicators, each with its own per-term weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityFamily {
    /// Explicit hedging language.
    Hedging,
    /// Language that admits requirements are missing.
    MissingRequirements,
    /// Language offering several approaches.
    MultipleApproaches,
    /// Language about undefined scope.
    UndefinedScope,
}

impl AmbiguityFamily {
    /// Weight added per matched term of this family.
    pub fn weight(self) -> f64 {
        match self {
            AmbiguityFamily::Hedging => 0.3,
            AmbiguityFamily::MissingRequirements => 0.4,
            AmbiguityFamily::MultipleApproaches => 0.2,
            AmbiguityFamily::UndefinedScope => 0.3,
        }
    }
}

/// Coarse task type, used to pick clarification questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Building something new.
    Development,
    /// Investigating or researching.
    Analysis,
    /// Making something faster or better.
    Optimization,
    /// Connecting systems together.
    Integration,
    /// Nothing more specific detected.
    General,
}

/// The analyzer's verdict on one task description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Canonical complexity.
    pub complexity: ComplexityLevel,
    /// Ambiguity in [0, 1].
    pub ambiguity: f64,
    /// Name of the complexity rule that fired, if any.
    pub complexity_rule: Option<String>,
    /// Ambiguity terms that matched, with their family.
    pub ambiguity_signals: Vec<(AmbiguityFamily, String)>,
    /// Detected task type.
    pub task_type: TaskType,
    /// Explicit requirement keywords.
    pub requirements: Vec<String>,
}

impl Analysis {
    /// Continuous complexity score in [0, 1].
    pub fn complexity_score(&self) -> f64 {
        self.complexity.score()
    }
}

/// Scores complexity and ambiguity from lexical signals.
///
/// Pure: the result depends only on the inputs and the static rule tables.
pub struct ComplexityAnalyzer {
    tiers: RuleTable<ComplexityLevel>,
    ambiguity: RuleTable<AmbiguityFamily>,
    task_types: RuleTable<TaskType>,
    requirement_terms: Vec<TermPattern>,
    technical_terms: Option<Regex>,
}

impl ComplexityAnalyzer {
    /// Analyzer with the built-in indicator tables.
    pub fn new() -> Self {
        Self {
            tiers: complexity_rules(),
            ambiguity: ambiguity_rules(),
            task_types: task_type_rules(),
            requirement_terms: REQUIREMENT_KEYWORDS
                .iter()
                .map(|t| TermPattern::new(*t))
                .collect(),
            technical_terms: Regex::new(r"(?i)\b[\w-]+\.(?:js|ts|py|rs|sql|html|css|java)\b").ok(),
        }
    }

    /// The complexity tier table, in precedence order.
    pub fn complexity_table(&self) -> &RuleTable<ComplexityLevel> {
        &self.tiers
    }

    /// Score a task's complexity and ambiguity.
    pub fn analyze(&self, description: &str, context: &Map<String, Value>) -> Analysis {
        let lexical = self.tiers.first_match(description);
        let complexity = context
            .get("complexity")
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .and_then(ComplexityLevel::new)
            .or_else(|| lexical.map(|r| r.outcome))
            .unwrap_or(ComplexityLevel::DEFAULT);

        let mut ambiguity_signals = Vec::new();
        let mut ambiguity = 0.0;
        for rule in self.ambiguity.rules() {
            for term in rule.matched_terms(description) {
                ambiguity += rule.outcome.weight();
                ambiguity_signals.push((rule.outcome, term.to_string()));
            }
        }
        let answered = answered_clarifications(context);
        ambiguity -= CLARIFICATION_CREDIT * answered as f64;

        Analysis {
            complexity,
            ambiguity: ambiguity.clamp(0.0, 1.0),
            complexity_rule: lexical.map(|r| r.name.clone()),
            ambiguity_signals,
            task_type: self.task_type(description),
            requirements: self.requirements(description, context),
        }
    }

    /// Detect the coarse task type.
    pub fn task_type(&self, description: &str) -> TaskType {
        self.task_types
            .first_match(description)
            .map_or(TaskType::General, |r| r.outcome)
    }

    /// Explicit requirement keywords: known domain terms, file-type
    /// technical terms, and any `requirements` listed in the context.
    pub fn requirements(&self, description: &str, context: &Map<String, Value>) -> Vec<String> {
        let mut found: Vec<String> = self
            .requirement_terms
            .iter()
            .filter(|p| p.matches(description))
            .map(|p| p.term().to_string())
            .collect();

        if let Some(re) = &self.technical_terms {
            for m in re.find_iter(description) {
                found.push(m.as_str().to_lowercase());
            }
        }

        if let Some(Value::Array(items)) = context.get("requirements") {
            found.extend(items.iter().filter_map(Value::as_str).map(str::to_lowercase));
        }

        let mut seen = std::collections::HashSet::new();
        found.retain(|r| seen.insert(r.clone()));
        found
    }

    /// Clarification questions tailored to the task type.
    pub fn clarification_questions(&self, analysis: &Analysis) -> Vec<String> {
        let questions: &[&str] = match analysis.task_type {
            TaskType::Development => &[
                "Which technology stack should be used for this implementation?",
                "What are the scalability requirements for this solution?",
                "Are there specific coding standards or architectural patterns to follow?",
                "What are the performance constraints or benchmarks?",
            ],
            TaskType::Analysis => &[
                "What specific aspects should be analyzed in detail?",
                "Are there particular metrics or criteria of interest?",
                "What sources or data should be considered in the analysis?",
                "What format should the analysis results take?",
            ],
            TaskType::Optimization => &[
                "What are the current performance metrics or baselines?",
                "Which areas need priority optimization?",
                "Are there constraints on changes to the existing system?",
                "What are the target improvement goals?",
            ],
            TaskType::Integration => &[
                "Which systems or services need to be integrated?",
                "What are the API specifications or data formats?",
                "Are there security or compliance requirements?",
                "What error handling or fallback mechanisms are needed?",
            ],
            TaskType::General => &[
                "What are the specific requirements for this task?",
                "What is the expected outcome or deliverable?",
                "Are there any constraints or limitations I should be aware of?",
                "What is the timeline or urgency for this task?",
            ],
        };
        questions.iter().map(|q| (*q).to_string()).collect()
    }
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

const REQUIREMENT_KEYWORDS: &[&str] = &[
    "api",
    "database",
    "ui",
    "frontend",
    "backend",
    "security",
    "performance",
    "testing",
    "documentation",
    "deployment",
    "authentication",
];

/// Complexity tiers. Lower tiers come first so a simple-intent signal wins
/// even when higher-tier signals co-occur.
pub fn complexity_rules() -> RuleTable<ComplexityLevel> {
    RuleTable::new(vec![
        Rule::new(
            "simple_intent",
            &["fix", "add", "update", "change", "simple", "basic"],
            ComplexityLevel(1),
            10,
        ),
        Rule::new(
            "system_level",
            &["implement", "design", "architecture", "system", "integrate"],
            ComplexityLevel(3),
            20,
        ),
        Rule::new(
            "large_scale_change",
            &["refactor", "migrate", "optimize performance", "scalable"],
            ComplexityLevel(4),
            30,
        ),
    ])
}

/// Ambiguity indicator families.
pub fn ambiguity_rules() -> RuleTable<AmbiguityFamily> {
    RuleTable::new(vec![
        Rule::new(
            "hedging",
            &[
                "unclear",
                "maybe",
                "possibly",
                "perhaps",
                "somehow",
                "could",
                "might",
                "think about",
                "consider",
            ],
            AmbiguityFamily::Hedging,
            10,
        ),
        Rule::new(
            "missing_requirements",
            &["requirements", "specifications", "details needed", "tbd", "unspecified"],
            AmbiguityFamily::MissingRequirements,
            20,
        ),
        Rule::new(
            "multiple_approaches",
            &["ways", "methods", "approaches", "options", "alternatives"],
            AmbiguityFamily::MultipleApproaches,
            30,
        ),
        Rule::new(
            "undefined_scope",
            &["scope", "boundaries", "limitations", "constraints"],
            AmbiguityFamily::UndefinedScope,
            40,
        ),
    ])
}

fn task_type_rules() -> RuleTable<TaskType> {
    RuleTable::new(vec![
        Rule::new(
            "development",
            &["implement", "develop", "build", "create", "code"],
            TaskType::Development,
            10,
        ),
        Rule::new(
            "analysis",
            &["analyze", "research", "investigate", "examine"],
            TaskType::Analysis,
            20,
        ),
        Rule::new(
            "optimization",
            &["optimize", "improve", "enhance", "speed up"],
            TaskType::Optimization,
            30,
        ),
        Rule::new(
            "integration",
            &["integrate", "connect", "combine", "merge"],
            TaskType::Integration,
            40,
        ),
    ])
}

fn answered_clarifications(context: &Map<String, Value>) -> usize {
    match context.get("clarifications") {
        Some(Value::Object(answers)) => answers
            .values()
            .filter(|v| v.as_str().map_or(!v.is_null(), |s| !s.trim().is_empty()))
            .count(),
        Some(Value::Array(answers)) => answers.len(),
        _ => 0,
    }
}
