//! URL argument parsing.
//!
//! Argument names are case-insensitive for the well-known set only;
//! anything else keeps its spelling. Values are percent-decoded.

use std::collections::HashMap;

use super::error::ApiError;

/// Names folded to lowercase during parsing.
const KNOWN_ARGS: &[&str] = &[
    "database",
    "table",
    "identifier",
    "dataset",
    "cache",
    "field",
    "acquire",
    "utoken",
    "ttl",
    "mode",
    "key",
    "value",
    "ip",
    "action",
    "duration",
    "encrypted",
    "secure",
    "adaptive",
    "optimize",
    "stats",
];

#[derive(Debug, Default, Clone)]
pub struct Args {
    map: HashMap<String, String>,
}

impl Args {
    pub fn parse(query: Option<&str>) -> Self {
        let mut map = HashMap::new();

        if let Some(query) = query {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                let lowered = name.to_lowercase();
                let name = if KNOWN_ARGS.contains(&lowered.as_str()) {
                    lowered
                } else {
                    name.into_owned()
                };
                map.insert(name, value.into_owned());
            }
        }

        Self { map }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, ApiError> {
        self.get(name)
            .ok_or_else(|| ApiError::validation(format!("\"{}\" argument is missing", name)))
    }

    /// Boolean flag: present and not literally false.
    pub fn flag(&self, name: &str) -> bool {
        match self.get(name) {
            Some(value) => !value.eq_ignore_ascii_case("false"),
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_args_case_insensitive() {
        let args = Args::parse(Some("Database=Lib&TABLE=books&custom=X"));
        assert_eq!(args.get("database"), Some("Lib"));
        assert_eq!(args.get("table"), Some("books"));
        // Unknown names keep their case.
        assert_eq!(args.get("custom"), Some("X"));
        assert_eq!(args.get("Custom"), None);
    }

    #[test]
    fn test_percent_decoding() {
        let args = Args::parse(Some("identifier=a%20b&field=x%2Fy"));
        assert_eq!(args.get("identifier"), Some("a b"));
        assert_eq!(args.get("field"), Some("x/y"));
    }

    #[test]
    fn test_require() {
        let args = Args::parse(Some("database=lib"));
        assert!(args.require("database").is_ok());
        assert!(args.require("table").is_err());
    }

    #[test]
    fn test_flags() {
        let args = Args::parse(Some("acquire=true&secure=FALSE&adaptive"));
        assert!(args.flag("acquire"));
        assert!(!args.flag("secure"));
        assert!(args.flag("adaptive"));
        assert!(!args.flag("missing"));
    }
}
