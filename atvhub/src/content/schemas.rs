//! Section schemas for the landing page.
//!
//! Every section type is described by a static table of fields. Validation
//! walks the incoming JSON against the table, fills defaults and keeps
//! unknown keys untouched.

use serde_json::{Map, Value};

const SIZES: &[&str] = &["sm", "md", "lg", "xl"];
const COLORS: &[&str] = &["white", "slate", "blue", "green", "purple", "orange", "red"];
const EYEBROW_BGS: &[&str] = &["blue", "green", "purple", "orange", "red", "slate", "none"];
const CTA_ACTIONS: &[&str] = &["link", "scroll", "openEstimator"];
const CTA_VARIANTS: &[&str] = &["primary", "secondary", "outline"];

/// Shape of one field.
#[derive(Debug, Clone, Copy)]
enum Field {
    /// Optional string.
    Text,
    /// Required non-empty string.
    Title,
    Choice(&'static [&'static str]),
    /// Required choice with a default applied when absent.
    ChoiceOr(&'static [&'static str], &'static str),
    /// Optional absolute URL, or the empty string.
    Url,
    Number,
    Bool,
    Texts,
    /// Optional array of objects.
    Items(&'static [(&'static str, Field)]),
    /// Required object.
    Object(&'static [(&'static str, Field)]),
    Any,
}

const STYLE: [(&str, Field); 2] = [("titleSize", Field::Choice(SIZES)), ("titleColor", Field::Choice(COLORS))];

const CTA: &[(&str, Field)] = &[
    ("label", Field::Title),
    ("actionType", Field::ChoiceOr(CTA_ACTIONS, "link")),
    ("target", Field::Text),
    ("payload", Field::Any),
    ("variant", Field::Choice(CTA_VARIANTS)),
];

const HERO: &[(&str, Field)] = &[
    ("eyebrow", Field::Text),
    ("eyebrowBg", Field::Choice(EYEBROW_BGS)),
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("subtitle", Field::Text),
    ("subtitleSize", Field::Choice(SIZES)),
    ("subtitleColor", Field::Choice(COLORS)),
    ("ctas", Field::Items(CTA)),
    ("stats", Field::Any),
    ("kpis", Field::Any),
    ("backgroundImage", Field::Url),
];

const VALUE_PROPS: &[(&str, Field)] = &[
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("description", Field::Text),
    (
        "cards",
        Field::Items(&[("icon", Field::Text), ("title", Field::Text), ("description", Field::Text)]),
    ),
];

const CONCEPT: &[(&str, Field)] = &[
    ("eyebrow", Field::Text),
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("subtitle", Field::Text),
    ("description", Field::Text),
    ("image", Field::Url),
    ("features", Field::Texts),
    ("bullets", Field::Texts),
];

const COMPARISON_LEFT: &[(&str, Field)] = &[
    ("title", Field::Text),
    ("label", Field::Text),
    ("headline", Field::Text),
    ("description", Field::Text),
    ("items", Field::Texts),
    ("points", Field::Texts),
];

const COMPARISON_RIGHT: &[(&str, Field)] = &[
    ("title", Field::Text),
    ("label", Field::Text),
    ("headline", Field::Text),
    ("description", Field::Text),
    ("items", Field::Texts),
    ("points", Field::Texts),
    ("highlight", Field::Bool),
];

const COMPARISON: &[(&str, Field)] = &[
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("left", Field::Object(COMPARISON_LEFT)),
    ("right", Field::Object(COMPARISON_RIGHT)),
];

const HOW_IT_WORKS: &[(&str, Field)] = &[
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("subtitle", Field::Text),
    (
        "steps",
        Field::Items(&[
            ("step", Field::Number),
            ("title", Field::Text),
            ("description", Field::Text),
            ("image", Field::Url),
        ]),
    ),
];

const USE_CASES: &[(&str, Field)] = &[
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("subtitle", Field::Text),
    ("description", Field::Text),
    (
        "cases",
        Field::Items(&[
            ("tag", Field::Text),
            ("title", Field::Text),
            ("description", Field::Text),
            ("metrics", Field::Texts),
            ("image", Field::Url),
        ]),
    ),
];

const WHY: &[(&str, Field)] = &[
    ("eyebrow", Field::Text),
    ("title", Field::Title),
    STYLE[0],
    STYLE[1],
    ("description", Field::Text),
    (
        "cards",
        Field::Items(&[("title", Field::Text), ("value", Field::Text), ("description", Field::Text)]),
    ),
];

const ESTIMATE_GUIDE: &[(&str, Field)] = &[("title", Field::Title), STYLE[0], STYLE[1], ("steps", Field::Texts)];

const GLOBAL_CTA: &[(&str, Field)] = &[
    ("title", Field::Text),
    STYLE[0],
    STYLE[1],
    ("description", Field::Text),
    ("buttonText", Field::Text),
    ("buttonLink", Field::Text),
];

const FAQ: &[(&str, Field)] = &[
    ("title", Field::Text),
    STYLE[0],
    STYLE[1],
    ("questions", Field::Items(&[("question", Field::Text), ("answer", Field::Text)])),
];

const REPORTING: &[(&str, Field)] = &[
    ("title", Field::Text),
    STYLE[0],
    STYLE[1],
    ("description", Field::Text),
    ("image", Field::Url),
];

fn schema_for(section_type: &str) -> Option<&'static [(&'static str, Field)]> {
    Some(match section_type {
        "hero" => HERO,
        "valueProps" => VALUE_PROPS,
        "concept" => CONCEPT,
        "comparison" => COMPARISON,
        "howItWorks" => HOW_IT_WORKS,
        "useCases" => USE_CASES,
        "why" => WHY,
        "estimateGuide" => ESTIMATE_GUIDE,
        "cta" => GLOBAL_CTA,
        "faq" => FAQ,
        "reporting" => REPORTING,
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaError {
    UnknownType(String),
    /// One message per failing path, e.g. `ctas.0.label: Required`.
    Invalid(Vec<String>),
}

/// Validate `data` against the schema of `section_type` and return the normalised value.
pub fn validate_section(section_type: &str, data: &Value) -> Result<Value, SchemaError> {
    let fields = schema_for(section_type).ok_or_else(|| SchemaError::UnknownType(section_type.to_string()))?;
    let mut issues = Vec::new();
    let out = check_object(fields, data, "", &mut issues);
    if issues.is_empty() {
        Ok(out)
    } else {
        Err(SchemaError::Invalid(issues))
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn check_object(fields: &[(&str, Field)], value: &Value, path: &str, issues: &mut Vec<String>) -> Value {
    let Some(obj) = value.as_object() else {
        issues.push(format!("{}: Expected object", if path.is_empty() { "(root)" } else { path }));
        return value.clone();
    };

    let mut out: Map<String, Value> = obj.clone();
    for (key, field) in fields {
        let at = join(path, key);
        match obj.get(*key) {
            None | Some(Value::Null) => match field {
                Field::Title | Field::Object(_) => issues.push(format!("{}: Required", at)),
                Field::ChoiceOr(_, default) => {
                    out.insert((*key).to_string(), Value::String((*default).to_string()));
                }
                _ => {}
            },
            Some(v) => {
                if let Some(normalised) = check_field(*field, v, &at, issues) {
                    out.insert((*key).to_string(), normalised);
                }
            }
        }
    }
    Value::Object(out)
}

fn check_field(field: Field, v: &Value, at: &str, issues: &mut Vec<String>) -> Option<Value> {
    match field {
        Field::Any => None,
        Field::Text => {
            if !v.is_string() {
                issues.push(format!("{}: Expected string", at));
            }
            None
        }
        Field::Title => {
            match v.as_str() {
                Some(s) if !s.is_empty() => {}
                Some(_) => issues.push(format!("{}: Title is required", at)),
                None => issues.push(format!("{}: Expected string", at)),
            }
            None
        }
        Field::Choice(options) | Field::ChoiceOr(options, _) => {
            match v.as_str() {
                Some(s) if options.contains(&s) => {}
                _ => issues.push(format!("{}: Expected one of {}", at, options.join("|"))),
            }
            None
        }
        Field::Url => {
            match v.as_str() {
                Some("") => {}
                Some(s) if url::Url::parse(s).is_ok() => {}
                _ => issues.push(format!("{}: Invalid url", at)),
            }
            None
        }
        Field::Number => {
            if !v.is_number() {
                issues.push(format!("{}: Expected number", at));
            }
            None
        }
        Field::Bool => {
            if !v.is_boolean() {
                issues.push(format!("{}: Expected boolean", at));
            }
            None
        }
        Field::Texts => {
            match v.as_array() {
                Some(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if !item.is_string() {
                            issues.push(format!("{}.{}: Expected string", at, i));
                        }
                    }
                }
                None => issues.push(format!("{}: Expected array", at)),
            }
            None
        }
        Field::Items(fields) => match v.as_array() {
            Some(items) => Some(Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| check_object(fields, item, &format!("{}.{}", at, i), issues))
                    .collect(),
            )),
            None => {
                issues.push(format!("{}: Expected array", at));
                None
            }
        },
        Field::Object(fields) => Some(check_object(fields, v, at, issues)),
    }
}
