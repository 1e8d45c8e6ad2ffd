//! Variable store
//!
//! Holds system (`!TIMEOUT`, `!ERRORIGNORE`, ...) and user (`!VAR0`..`!VAR9`)
//! variables with per-name validation, placeholder expansion and the extract
//! accumulator. Names are matched case-insensitively; values keep their
//! number/string type.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::errors::VariableError;
use crate::expression;
use crate::value::Value;

/// Separator between entries of the extract accumulator
pub const EXTRACT_DELIMITER: &str = "[EXTRACT]";

/// Format used by a bare `{{!NOW}}`
pub const DEFAULT_NOW_FORMAT: &str = "yyyymmdd_hhnnss";

pub const TIMEOUT: &str = "!TIMEOUT";
pub const TIMEOUT_TAG: &str = "!TIMEOUT_TAG";
pub const TIMEOUT_STEP: &str = "!TIMEOUT_STEP";
pub const TIMEOUT_PAGE: &str = "!TIMEOUT_PAGE";
pub const ERRORIGNORE: &str = "!ERRORIGNORE";
pub const ERRORLOOP: &str = "!ERRORLOOP";
pub const WAITPAGECOMPLETE: &str = "!WAITPAGECOMPLETE";
pub const LOOP: &str = "!LOOP";
pub const EXTRACT: &str = "!EXTRACT";
pub const EXTRACTADD: &str = "!EXTRACTADD";
pub const NOW: &str = "!NOW";
pub const FILE_PROFILER: &str = "!FILE_PROFILER";
pub const DATASOURCE_LINE: &str = "!DATASOURCE_LINE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Free,
    YesNo,
    NonNegativeInt,
    PositiveInt,
    OneOf(&'static [&'static str]),
    ReadOnly,
}

impl Rule {
    fn expected(self) -> &'static str {
        match self {
            Rule::Free | Rule::ReadOnly => "any value",
            Rule::YesNo => "YES or NO",
            Rule::NonNegativeInt => "an integer from 0 to 4294967295",
            Rule::PositiveInt => "an integer from 1 to 4294967295",
            Rule::OneOf(_) => "one of the listed keywords",
        }
    }
}

/// Largest value the integer rules accept
const MAX_INTEGER: f64 = u32::MAX as f64;

const REPLAY_SPEEDS: &[&str] = &["SLOW", "MEDIUM", "FAST"];

const DEFINITIONS: &[(&str, Rule, &str)] = &[
    (TIMEOUT, Rule::NonNegativeInt, "60"),
    (TIMEOUT_TAG, Rule::NonNegativeInt, "6"),
    (TIMEOUT_STEP, Rule::NonNegativeInt, "6"),
    (TIMEOUT_PAGE, Rule::NonNegativeInt, "60"),
    ("!TIMEOUT_DOWNLOAD", Rule::NonNegativeInt, "60"),
    (ERRORIGNORE, Rule::YesNo, "NO"),
    (ERRORLOOP, Rule::YesNo, "NO"),
    ("!SINGLESTEP", Rule::YesNo, "NO"),
    (WAITPAGECOMPLETE, Rule::YesNo, "NO"),
    (LOOP, Rule::PositiveInt, "1"),
    ("!REPLAYSPEED", Rule::OneOf(REPLAY_SPEEDS), "FAST"),
    (DATASOURCE_LINE, Rule::PositiveInt, "1"),
    ("!DATASOURCE", Rule::Free, ""),
    ("!DATASOURCE_COLUMNS", Rule::Free, ""),
    ("!DATASOURCE_DELIMITER", Rule::Free, ","),
    ("!FOLDER_DATASOURCE", Rule::Free, ""),
    ("!FOLDER_DOWNLOAD", Rule::Free, ""),
    ("!URLCURRENT", Rule::Free, ""),
    ("!ENCRYPTION", Rule::Free, ""),
    ("!CLIPBOARD", Rule::Free, ""),
    (FILE_PROFILER, Rule::Free, ""),
    ("!VAR0", Rule::Free, ""),
    ("!VAR1", Rule::Free, ""),
    ("!VAR2", Rule::Free, ""),
    ("!VAR3", Rule::Free, ""),
    ("!VAR4", Rule::Free, ""),
    ("!VAR5", Rule::Free, ""),
    ("!VAR6", Rule::Free, ""),
    ("!VAR7", Rule::Free, ""),
    ("!VAR8", Rule::Free, ""),
    ("!VAR9", Rule::Free, ""),
    (EXTRACT, Rule::Free, ""),
    (EXTRACTADD, Rule::ReadOnly, ""),
    (NOW, Rule::ReadOnly, ""),
];

fn canonical(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

fn rule_for(name: &str) -> Option<Rule> {
    if let Some((_, rule, _)) = DEFINITIONS.iter().find(|(n, _, _)| *n == name) {
        return Some(*rule);
    }
    // datasource columns !COL1, !COL2, ...
    let column = name.strip_prefix("!COL")?;
    if !column.is_empty() && column.chars().all(|c| c.is_ascii_digit()) && column != "0" {
        Some(Rule::Free)
    } else {
        None
    }
}

fn normalize(name: &str, rule: Rule, value: Value) -> Result<Value, VariableError> {
    let invalid = |value: &Value| VariableError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        expected: rule.expected(),
    };

    match rule {
        Rule::Free => Ok(value),
        Rule::ReadOnly => Err(VariableError::ReadOnly(name.to_string())),
        Rule::YesNo | Rule::OneOf(_) => {
            let keyword = value.to_string().trim().to_ascii_uppercase();
            let allowed: &[&str] = match rule {
                Rule::OneOf(list) => list,
                _ => &["YES", "NO"],
            };
            if allowed.contains(&keyword.as_str()) {
                Ok(Value::Str(keyword))
            } else {
                Err(invalid(&value))
            }
        }
        Rule::NonNegativeInt | Rule::PositiveInt => {
            let min = if rule == Rule::PositiveInt { 1.0 } else { 0.0 };
            match value.as_number() {
                Some(n) if n.fract() == 0.0 && n >= min && n <= MAX_INTEGER => Ok(Value::Num(n)),
                _ => Err(invalid(&value)),
            }
        }
    }
}

/// Result of a successful assignment
#[derive(Debug, Clone, PartialEq)]
pub struct SetOutcome {
    pub name: String,
    pub previous: Value,
    pub current: Value,
}

/// Result of placeholder expansion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub expanded: String,
    /// Upper-cased names in order of first reference
    pub referenced: Vec<String>,
}

/// Typed variable store, one per engine instance
#[derive(Debug, Clone)]
pub struct VariableStore {
    values: HashMap<String, Value>,
    extract: Vec<String>,
    loop_overridden: bool,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    /// Create a store holding the documented defaults
    pub fn new() -> Self {
        let mut values = HashMap::new();
        for (name, rule, default) in DEFINITIONS {
            if *rule == Rule::ReadOnly {
                continue;
            }
            let value = normalize(name, *rule, Value::from(*default)).unwrap_or_else(|_| Value::from(*default));
            values.insert(name.to_string(), value);
        }
        Self {
            values,
            extract: Vec::new(),
            loop_overridden: false,
        }
    }

    /// Restore every variable to its default
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True when `name` is a recognised variable
    pub fn has(&self, name: &str) -> bool {
        rule_for(&canonical(name)).is_some()
    }

    /// Current value; `None` for unrecognised names
    pub fn get(&self, name: &str) -> Option<Value> {
        let name = canonical(name);
        match name.as_str() {
            NOW => Some(Value::Str(format_timestamp(DEFAULT_NOW_FORMAT, &Local::now()))),
            EXTRACTADD => Some(Value::Str(self.extract_string())),
            _ => match self.values.get(&name) {
                Some(value) => Some(value.clone()),
                None if rule_for(&name).is_some() => Some(Value::empty()),
                None => None,
            },
        }
    }

    /// Current value rendered as text; unresolved names give `""`
    pub fn get_string(&self, name: &str) -> String {
        self.get(name).map(|v| v.to_string()).unwrap_or_default()
    }

    /// Numeric reading of a variable
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.as_number())
    }

    /// True when a YES/NO variable holds YES
    pub fn is_yes(&self, name: &str) -> bool {
        self.get_string(name).eq_ignore_ascii_case("YES")
    }

    /// Validate and assign a variable
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<SetOutcome, VariableError> {
        let name = canonical(name);
        let rule = rule_for(&name).ok_or_else(|| VariableError::Unknown(name.clone()))?;
        let value = normalize(&name, rule, value.into())?;
        let previous = self.get(&name).unwrap_or_else(Value::empty);

        let current = match name.as_str() {
            EXTRACT => self.assign_extract(value),
            TIMEOUT => {
                if let Some(seconds) = value.as_number() {
                    let tag = (seconds / 10.0).floor().max(1.0);
                    debug!(timeout = seconds, timeout_tag = tag, "cascading !TIMEOUT");
                    self.values.insert(TIMEOUT_TAG.to_string(), Value::Num(tag));
                }
                value
            }
            LOOP => {
                self.loop_overridden = true;
                value
            }
            _ => value,
        };

        self.values.insert(name.clone(), current.clone());
        Ok(SetOutcome {
            name,
            previous,
            current,
        })
    }

    fn assign_extract(&mut self, value: Value) -> Value {
        let text = value.to_string();
        if text.eq_ignore_ascii_case("NULL") {
            self.extract.clear();
            Value::empty()
        } else {
            self.extract.push(text);
            value
        }
    }

    /// Extracted values collected in this run
    pub fn extract_data(&self) -> &[String] {
        &self.extract
    }

    pub fn extract_string(&self) -> String {
        self.extract.join(EXTRACT_DELIMITER)
    }

    /// True once `!LOOP` was assigned through [`VariableStore::set`] this run
    pub fn loop_overridden(&self) -> bool {
        self.loop_overridden
    }

    /// Engine-side loop counter update; does not count as an explicit set
    pub(crate) fn set_loop_counter(&mut self, value: u32) {
        self.values.insert(LOOP.to_string(), Value::Num(f64::from(value)));
    }

    /// Per-run reset of run-scoped state
    pub(crate) fn begin_run(&mut self) {
        self.extract.clear();
        self.values.insert(EXTRACT.to_string(), Value::empty());
        self.loop_overridden = false;
        self.set_loop_counter(1);
    }

    /// Sorted copy of all stored values plus the derived `!EXTRACTADD`
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        let mut snapshot: BTreeMap<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        snapshot.insert(EXTRACTADD.to_string(), Value::Str(self.extract_string()));
        snapshot
    }

    /// Replace every `{{!NAME}}` (and `{{!NOW:FORMAT}}`) in a single pass
    pub fn expand(&self, text: &str) -> Expansion {
        let mut expanded = String::with_capacity(text.len());
        let mut referenced: Vec<String> = Vec::new();
        let mut rest = text;

        while let Some(start) = rest.find("{{") {
            expanded.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                expanded.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let inner = after[..end].trim();
            if inner.starts_with('!') {
                let upper = canonical(inner);
                let (name, replacement) = match upper.split_once(':') {
                    Some((NOW, _)) => {
                        // keep the format's original casing
                        let format = &inner[inner.find(':').map_or(0, |i| i + 1)..];
                        (NOW.to_string(), format_timestamp(format, &Local::now()))
                    }
                    _ => {
                        let value = self.get_string(&upper);
                        (upper, value)
                    }
                };
                if !referenced.contains(&name) {
                    referenced.push(name);
                }
                expanded.push_str(&replacement);
            } else {
                expanded.push_str(&rest[start..start + 2 + end + 2]);
            }
            rest = &after[end + 2..];
        }
        expanded.push_str(rest);

        Expansion {
            expanded,
            referenced,
        }
    }

    /// Expand placeholders, then evaluate as an arithmetic expression
    pub fn evaluate(&self, expression_text: &str) -> Value {
        let expansion = self.expand(expression_text);
        expression::evaluate(&expansion.expanded)
    }
}

/// Render a timestamp using `yyyy yy mm dd hh nn ss dow doy` tokens
pub fn format_timestamp<Tz: TimeZone>(format: &str, at: &DateTime<Tz>) -> String {
    const TOKENS: &[&str] = &["yyyy", "yy", "mm", "dow", "doy", "dd", "hh", "nn", "ss"];

    let mut out = String::new();
    let mut rest = format;
    'scan: while !rest.is_empty() {
        for token in TOKENS {
            if rest.len() >= token.len()
                && rest.is_char_boundary(token.len())
                && rest[..token.len()].eq_ignore_ascii_case(token)
            {
                let rendered = match *token {
                    "yyyy" => format!("{:04}", at.year()),
                    "yy" => format!("{:02}", at.year() % 100),
                    "mm" => format!("{:02}", at.month()),
                    "dow" => at.weekday().number_from_sunday().to_string(),
                    "doy" => at.ordinal().to_string(),
                    "dd" => format!("{:02}", at.day()),
                    "hh" => format!("{:02}", at.hour()),
                    "nn" => format!("{:02}", at.minute()),
                    _ => format!("{:02}", at.second()),
                };
                out.push_str(&rendered);
                rest = &rest[token.len()..];
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}
