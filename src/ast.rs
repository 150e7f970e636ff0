/// Name of the pseudo-target whose prerequisites are never backed by files.
pub const PHONY: &str = ".PHONY";

/// `name = value` or `name := value`; the value is already expanded.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment<'a> {
    pub name: &'a str,
    pub value: String,
}

/// What a non-indented `names : prerequisites` line declares.
#[derive(Clone, Debug, PartialEq)]
pub enum Header<'a> {
    Rule {
        targets: Vec<&'a str>,
        prerequisites: Vec<&'a str>,
    },
    Phony(Vec<&'a str>),
}

/// A target block being accumulated: every name in `targets` shares the
/// prerequisites and recipes.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub targets: Vec<String>,
    pub prerequisites: Vec<String>,
    pub recipes: Vec<String>,
    /// Where the header was, for diagnostics.
    pub line: usize,
    pub text: String,
}

impl Rule {
    pub fn new(targets: &[&str], prerequisites: &[&str], line: usize, text: &str) -> Rule {
        Rule {
            targets: targets.iter().map(|t| t.to_string()).collect(),
            prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
            recipes: Vec::new(),
            line,
            text: text.to_string(),
        }
    }
}
