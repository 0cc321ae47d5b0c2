//! Path Templates - Deterministic File Locations
//!
//! A template turns a field mapping into a path and a path back into fields.
//! Pipelines only see the [`PathTemplate`] trait; [`KeyTemplate`] is the
//! pattern implementation used by configuration files.
//!
//! Pattern grammar: literal text, `{key}` string keys, `{key:03}` integer
//! keys zero-padded to a width (`{key:int}` for no padding), and `[...]`
//! optional sections that are emitted only when every key inside is set.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::error::TemplateError;
use crate::model::{FieldMapping, FieldValue};

pub trait PathTemplate {
    fn name(&self) -> &str;

    /// Extract the template fields from an existing path.
    fn get_fields(&self, path: &Path) -> Result<FieldMapping, TemplateError>;

    /// Build a path from a field mapping.
    fn apply_fields(&self, fields: &FieldMapping) -> Result<PathBuf, TemplateError>;

    /// Find existing files matching the template, ignoring `skip_keys` and any
    /// key absent from `fields`.
    fn paths_matching(
        &self,
        fields: &FieldMapping,
        skip_keys: &[&str],
    ) -> Result<Vec<PathBuf>, TemplateError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeySpec {
    name: String,
    int_width: Option<usize>,
}

impl KeySpec {
    fn render(&self, value: &FieldValue) -> Result<String, TemplateError> {
        match self.int_width {
            Some(width) => {
                let v = value.as_int().ok_or_else(|| TemplateError::NotAnInteger {
                    key: self.name.clone(),
                    value: value.to_string(),
                })?;
                Ok(format!("{:0width$}", v, width = width))
            }
            None => Ok(value.to_string()),
        }
    }

    fn parse(&self, raw: &str) -> FieldValue {
        match self.int_width {
            Some(_) => raw
                .parse::<i64>()
                .map(FieldValue::Int)
                .unwrap_or_else(|_| FieldValue::Str(raw.to_string())),
            None => FieldValue::Str(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Key(KeySpec),
    Optional(Vec<Token>),
}

#[derive(Debug, Clone, Copy)]
enum Flat<'a> {
    Literal(&'a str),
    Key(&'a KeySpec),
}

/// Pattern-based template rooted at a project directory.
#[derive(Debug, Clone)]
pub struct KeyTemplate {
    name: String,
    pattern: String,
    root: PathBuf,
    tokens: Vec<Token>,
}

impl KeyTemplate {
    pub fn new(
        name: impl Into<String>,
        pattern: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Result<Self, TemplateError> {
        let pattern = pattern.into();
        let tokens = parse_pattern(&pattern)?;
        Ok(Self {
            name: name.into(),
            pattern,
            root: root.into(),
            tokens,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Flattened token lists, richest optional combination first.
    fn variants(&self) -> Vec<Vec<Flat<'_>>> {
        let optional_count = self
            .tokens
            .iter()
            .filter(|t| matches!(t, Token::Optional(_)))
            .count();
        let combos = 1usize << optional_count;

        (0..combos)
            .rev()
            .map(|mask| {
                let mut flat = vec![];
                let mut bit = optional_count;
                for token in &self.tokens {
                    match token {
                        Token::Literal(s) => flat.push(Flat::Literal(s)),
                        Token::Key(k) => flat.push(Flat::Key(k)),
                        Token::Optional(inner) => {
                            bit -= 1;
                            if mask & (1 << bit) != 0 {
                                for t in inner {
                                    match t {
                                        Token::Literal(s) => flat.push(Flat::Literal(s)),
                                        Token::Key(k) => flat.push(Flat::Key(k)),
                                        Token::Optional(_) => {}
                                    }
                                }
                            }
                        }
                    }
                }
                flat
            })
            .collect()
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = if self.root.as_os_str().is_empty() {
            path
        } else {
            path.strip_prefix(&self.root).ok()?
        };
        Some(rel.to_string_lossy().replace('\\', "/"))
    }

    /// Rendered text up to the first key not fixed by `fields`.
    fn fixed_prefix(&self, fields: &FieldMapping) -> String {
        let mut prefix = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => prefix.push_str(s),
                Token::Key(k) => match fields.get(&k.name).map(|v| k.render(v)) {
                    Some(Ok(rendered)) => prefix.push_str(&rendered),
                    _ => break,
                },
                Token::Optional(_) => break,
            }
        }
        prefix
    }
}

impl PathTemplate for KeyTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_fields(&self, path: &Path) -> Result<FieldMapping, TemplateError> {
        let no_match = || TemplateError::NoMatch {
            path: path.to_path_buf(),
            pattern: self.pattern.clone(),
        };
        let input = self.relative(path).ok_or_else(no_match)?;

        for flat in self.variants() {
            let mut bindings = FieldMapping::new();
            if match_tokens(&flat, &input, 0, &mut bindings) {
                return Ok(bindings);
            }
        }
        Err(no_match())
    }

    fn apply_fields(&self, fields: &FieldMapping) -> Result<PathBuf, TemplateError> {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Key(k) => {
                    let value = fields
                        .get(&k.name)
                        .ok_or_else(|| TemplateError::MissingField(k.name.clone()))?;
                    out.push_str(&k.render(value)?);
                }
                Token::Optional(inner) => {
                    let complete = inner.iter().all(|t| match t {
                        Token::Key(k) => fields.contains_key(&k.name),
                        _ => true,
                    });
                    if !complete {
                        continue;
                    }
                    for t in inner {
                        match t {
                            Token::Literal(s) => out.push_str(s),
                            Token::Key(k) => out.push_str(&k.render(&fields[&k.name])?),
                            Token::Optional(_) => {}
                        }
                    }
                }
            }
        }
        Ok(self.root.join(out))
    }

    fn paths_matching(
        &self,
        fields: &FieldMapping,
        skip_keys: &[&str],
    ) -> Result<Vec<PathBuf>, TemplateError> {
        let fixed: FieldMapping = fields
            .iter()
            .filter(|(k, _)| !skip_keys.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let prefix = self.fixed_prefix(&fixed);
        let walk_root = match prefix.rfind('/') {
            Some(idx) => self.root.join(&prefix[..idx]),
            None => self.root.clone(),
        };
        if !walk_root.is_dir() {
            return Ok(vec![]);
        }

        let mut found = vec![];
        for entry in WalkDir::new(&walk_root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    warn!(template = %self.name, "skipping unreadable entry: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(extracted) = self.get_fields(entry.path()) else {
                continue;
            };
            let agrees = fixed.iter().all(|(key, expected)| match extracted.get(key) {
                Some(actual) => values_agree(expected, actual),
                None => true,
            });
            if agrees {
                found.push(entry.into_path());
            }
        }
        found.sort();
        Ok(found)
    }
}

fn values_agree(a: &FieldValue, b: &FieldValue) -> bool {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => x == y,
        _ => a.to_string() == b.to_string(),
    }
}

fn match_tokens(tokens: &[Flat<'_>], input: &str, pos: usize, bindings: &mut FieldMapping) -> bool {
    let Some((first, rest)) = tokens.split_first() else {
        return pos == input.len();
    };
    let remaining = &input[pos..];

    match first {
        Flat::Literal(lit) => {
            remaining.starts_with(lit) && match_tokens(rest, input, pos + lit.len(), bindings)
        }
        Flat::Key(key) => {
            if let Some(bound) = bindings.get(&key.name) {
                let Ok(rendered) = key.render(bound) else {
                    return false;
                };
                return remaining.starts_with(&rendered)
                    && match_tokens(rest, input, pos + rendered.len(), bindings);
            }

            // Shortest candidate first, never crossing a path separator.
            for (idx, ch) in remaining.char_indices() {
                if ch == '/' || (key.int_width.is_some() && !ch.is_ascii_digit()) {
                    break;
                }
                let end = idx + ch.len_utf8();
                let raw = &remaining[..end];
                bindings.insert(key.name.clone(), key.parse(raw));
                if match_tokens(rest, input, pos + end, bindings) {
                    return true;
                }
                bindings.remove(&key.name);
            }
            false
        }
    }
}

/// Every combination of optional sections is tried when reading a path back.
const MAX_OPTIONAL_SECTIONS: usize = 8;

fn parse_pattern(pattern: &str) -> Result<Vec<Token>, TemplateError> {
    let invalid = |reason: &str| TemplateError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    let mut tokens: Vec<Token> = vec![];
    let mut group: Option<Vec<Token>> = None;
    let mut literal = String::new();
    let mut chars = pattern.chars();

    fn flush(literal: &mut String, target: &mut Vec<Token>) {
        if !literal.is_empty() {
            target.push(Token::Literal(std::mem::take(literal)));
        }
    }

    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                let mut body = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => body.push(c),
                        None => return Err(invalid("unterminated '{'")),
                    }
                }
                let key = parse_key(&body).ok_or_else(|| invalid("malformed key"))?;
                let target = group.as_mut().unwrap_or(&mut tokens);
                flush(&mut literal, target);
                target.push(Token::Key(key));
            }
            '[' => {
                if group.is_some() {
                    return Err(invalid("nested optional sections"));
                }
                flush(&mut literal, &mut tokens);
                group = Some(vec![]);
            }
            ']' => {
                let mut inner = group.take().ok_or_else(|| invalid("unbalanced ']'"))?;
                flush(&mut literal, &mut inner);
                tokens.push(Token::Optional(inner));
            }
            '}' => return Err(invalid("unbalanced '}'")),
            c => literal.push(c),
        }
    }

    if group.is_some() {
        return Err(invalid("unterminated '['"));
    }
    flush(&mut literal, &mut tokens);

    let optional_count = tokens
        .iter()
        .filter(|t| matches!(t, Token::Optional(_)))
        .count();
    if optional_count > MAX_OPTIONAL_SECTIONS {
        return Err(invalid("too many optional sections"));
    }

    // Adjacent keys cannot be told apart when reading paths back.
    let mut previous_was_key = false;
    for token in &tokens {
        let is_key = matches!(token, Token::Key(_));
        if is_key && previous_was_key {
            return Err(invalid("adjacent keys need a separator"));
        }
        previous_was_key = is_key;
    }

    Ok(tokens)
}

fn parse_key(body: &str) -> Option<KeySpec> {
    let (name, format) = match body.split_once(':') {
        Some((name, format)) => (name, Some(format)),
        None => (body, None),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    let int_width = match format {
        None => None,
        Some("int") => Some(0),
        Some(digits) => Some(digits.parse::<usize>().ok()?),
    };
    Some(KeySpec {
        name: name.to_string(),
        int_width,
    })
}

/// Template registry - named templates shared by all outputs
pub struct TemplateRegistry {
    templates: HashMap<String, Box<dyn PathTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    /// Build [`KeyTemplate`]s for every named pattern, rooted at `root`.
    pub fn from_patterns(
        root: &Path,
        patterns: &BTreeMap<String, String>,
    ) -> Result<Self, TemplateError> {
        let mut registry = Self::new();
        for (name, pattern) in patterns {
            registry.register(KeyTemplate::new(name.clone(), pattern.clone(), root)?);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&dyn PathTemplate> {
        self.templates.get(name).map(|t| t.as_ref())
    }

    pub fn require(&self, name: &str) -> Result<&dyn PathTemplate, TemplateError> {
        self.get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn register(&mut self, template: impl PathTemplate + 'static) {
        self.templates
            .insert(template.name().to_string(), Box::new(template));
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const WORK: &str = "{Shot}/work/maya/{Shot}_matchmove_v{version:03}.ma";
    const GEO: &str = "{Shot}/publish/geo/{Shot}[_{name}]_geo_v{version:03}.obj";

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMapping {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_get_fields_binds_repeated_keys() {
        let t = KeyTemplate::new("work", WORK, "/shows/demo").unwrap();
        let f = t
            .get_fields(Path::new("/shows/demo/end_shot_001/work/maya/end_shot_001_matchmove_v012.ma"))
            .unwrap();
        assert_eq!(f["Shot"], FieldValue::from("end_shot_001"));
        assert_eq!(f["version"], FieldValue::Int(12));
    }

    #[test]
    fn test_get_fields_rejects_foreign_path() {
        let t = KeyTemplate::new("work", WORK, "/shows/demo").unwrap();
        assert!(t.get_fields(Path::new("/elsewhere/a.ma")).is_err());
        assert!(t
            .get_fields(Path::new("/shows/demo/sh1/work/maya/sh2_matchmove_v001.ma"))
            .is_err());
    }

    #[test]
    fn test_apply_fields_pads_and_skips_optional() {
        let t = KeyTemplate::new("geo", GEO, "/shows/demo").unwrap();
        let mut f = fields(&[("Shot", "sh010".into()), ("version", FieldValue::Int(3))]);
        assert_eq!(
            t.apply_fields(&f).unwrap(),
            PathBuf::from("/shows/demo/sh010/publish/geo/sh010_geo_v003.obj")
        );

        f.insert("name".into(), "pCube1".into());
        assert_eq!(
            t.apply_fields(&f).unwrap(),
            PathBuf::from("/shows/demo/sh010/publish/geo/sh010_pCube1_geo_v003.obj")
        );
    }

    #[test]
    fn test_apply_fields_missing_required_key() {
        let t = KeyTemplate::new("geo", GEO, "/shows/demo").unwrap();
        let f = fields(&[("Shot", "sh010".into())]);
        assert!(matches!(
            t.apply_fields(&f),
            Err(TemplateError::MissingField(key)) if key == "version"
        ));
    }

    #[test]
    fn test_optional_section_read_back() {
        let t = KeyTemplate::new("geo", GEO, "").unwrap();
        let f = t
            .get_fields(Path::new("sh010/publish/geo/sh010_propA_geo_v007.obj"))
            .unwrap();
        assert_eq!(f["name"], FieldValue::from("propA"));
        let f = t
            .get_fields(Path::new("sh010/publish/geo/sh010_geo_v007.obj"))
            .unwrap();
        assert!(!f.contains_key("name"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(KeyTemplate::new("x", "{a}{b}", "").is_err());
        assert!(KeyTemplate::new("x", "{a", "").is_err());
        assert!(KeyTemplate::new("x", "[a[{b}]]", "").is_err());
        assert!(KeyTemplate::new("x", "{version:abc}", "").is_err());
    }

    #[test]
    fn test_paths_matching_skips_version() {
        let dir = tempfile::tempdir().unwrap();
        let lens_dir = dir.path().join("sh010/work/3de");
        fs::create_dir_all(&lens_dir).unwrap();
        for name in ["sh010_lens_v001.nk", "sh010_lens_v002.nk", "notes.txt"] {
            fs::write(lens_dir.join(name), b"x").unwrap();
        }
        let other = dir.path().join("sh020/work/3de");
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("sh020_lens_v001.nk"), b"x").unwrap();

        let t = KeyTemplate::new(
            "lens",
            "{Shot}/work/3de/{Shot}_lens_v{version:03}.nk",
            dir.path(),
        )
        .unwrap();
        let f = fields(&[("Shot", "sh010".into()), ("version", FieldValue::Int(9))]);
        let found = t.paths_matching(&f, &["version"]).unwrap();
        assert_eq!(
            found,
            vec![lens_dir.join("sh010_lens_v001.nk"), lens_dir.join("sh010_lens_v002.nk")]
        );
    }

    #[test]
    fn test_optional_section_limit() {
        let eight = "{a}".to_string() + &"[_{b}]".repeat(MAX_OPTIONAL_SECTIONS);
        assert!(KeyTemplate::new("x", eight, "").is_ok());

        let nine = "{a}".to_string() + &"[_{b}]".repeat(MAX_OPTIONAL_SECTIONS + 1);
        assert!(matches!(
            KeyTemplate::new("x", nine, ""),
            Err(TemplateError::InvalidPattern { .. })
        ));

        let many = "[x]".repeat(64);
        assert!(KeyTemplate::new("x", many, "").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_paths_matching_skips_dangling_links() {
        let dir = tempfile::tempdir().unwrap();
        let lens_dir = dir.path().join("sh010/work/3de");
        fs::create_dir_all(&lens_dir).unwrap();
        fs::write(lens_dir.join("sh010_lens_v001.nk"), b"x").unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", lens_dir.join("stale_link")).unwrap();

        let t = KeyTemplate::new(
            "lens",
            "{Shot}/work/3de/{Shot}_lens_v{version:03}.nk",
            dir.path(),
        )
        .unwrap();
        let f = fields(&[("Shot", "sh010".into())]);
        let found = t.paths_matching(&f, &["version"]).unwrap();
        assert_eq!(found, vec![lens_dir.join("sh010_lens_v001.nk")]);
    }

    #[test]
    fn test_paths_matching_missing_root_is_empty() {
        let t = KeyTemplate::new("lens", "{Shot}/lens.nk", "/definitely/not/here").unwrap();
        assert!(t.paths_matching(&FieldMapping::new(), &[]).unwrap().is_empty());
    }

    #[test]
    fn test_registry_lookup() {
        let mut patterns = BTreeMap::new();
        patterns.insert("work".to_string(), WORK.to_string());
        let registry = TemplateRegistry::from_patterns(Path::new("/shows"), &patterns).unwrap();
        assert!(registry.get("work").is_some());
        assert!(matches!(registry.require("nope"), Err(TemplateError::NotFound(_))));
        assert_eq!(registry.names(), vec!["work"]);
    }
}
