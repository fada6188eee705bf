use crate::error::{Result, UtilError};

/// Hierarchical key/value tree, keys separated by `::` and matched
/// ASCII-case-insensitively. A trailing `::` on a set appends an
/// unnamed list child, the idiom used for list-valued options.
#[derive(Debug, Default, Clone)]
pub struct Configuration {
    root: Node,
}

#[derive(Debug, Default, Clone)]
struct Node {
    name: String,
    value: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn child_mut_or_insert(&mut self, name: &str) -> &mut Node {
        if let Some(i) = self
            .children
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
        {
            return &mut self.children[i];
        }
        self.children.push(Node {
            name: name.to_string(),
            ..Node::default()
        });
        self.children.last_mut().unwrap()
    }
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, key: &str) -> Option<&Node> {
        let mut node = &self.root;
        for part in key.split("::") {
            if part.is_empty() {
                continue;
            }
            node = node.child(part)?;
        }
        Some(node)
    }

    /// Set `key` to `value`, creating intermediate nodes. A key ending
    /// in `::` appends a fresh unnamed child instead of overwriting.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let append = key.ends_with("::");
        let mut node = &mut self.root;
        for part in key.trim_end_matches(':').split("::") {
            if part.is_empty() {
                continue;
            }
            node = node.child_mut_or_insert(part);
        }
        if append {
            node.children.push(Node {
                value: value.into(),
                ..Node::default()
            });
        } else {
            node.value = value.into();
        }
    }

    /// Ingest a command-line `-o key=value` item.
    pub fn set_cli_item(&mut self, item: &str) -> Result<()> {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| UtilError::InvalidConfigItem(item.to_string()))?;
        if key.trim().is_empty() {
            return Err(UtilError::InvalidConfigItem(item.to_string()));
        }
        self.set(key.trim(), value);
        Ok(())
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub fn find(&self, key: &str, default: &str) -> String {
        self.lookup(key)
            .filter(|n| !n.value.is_empty())
            .map(|n| n.value.clone())
            .unwrap_or_else(|| default.to_string())
    }

    pub fn find_opt(&self, key: &str) -> Option<String> {
        self.lookup(key)
            .filter(|n| !n.value.is_empty())
            .map(|n| n.value.clone())
    }

    pub fn find_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key).map(|n| n.value.as_str()) {
            Some(v) => parse_bool(v).unwrap_or(default),
            None => default,
        }
    }

    pub fn find_int(&self, key: &str, default: i64) -> i64 {
        self.lookup(key)
            .and_then(|n| n.value.parse().ok())
            .unwrap_or(default)
    }

    /// Values of the children of `key`, in insertion order. List items
    /// appended with a trailing `::` come back here.
    pub fn find_vector(&self, key: &str) -> Vec<String> {
        self.lookup(key)
            .map(|n| {
                n.children
                    .iter()
                    .filter(|c| !c.value.is_empty())
                    .map(|c| c.value.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `(name, value)` of each named child of `key`, for walking
    /// subtree tables like compressor definitions.
    pub fn tree(&self, key: &str) -> Vec<(String, String)> {
        self.lookup(key)
            .map(|n| {
                n.children
                    .iter()
                    .map(|c| (c.name.clone(), c.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove `key` and everything below it.
    pub fn clear(&mut self, key: &str) {
        let Some((parent_key, leaf)) = split_leaf(key) else {
            return;
        };
        let mut node = &mut self.root;
        for part in parent_key.split("::") {
            if part.is_empty() {
                continue;
            }
            let Some(i) = node
                .children
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(part))
            else {
                return;
            };
            node = &mut node.children[i];
        }
        node.children
            .retain(|c| !c.name.eq_ignore_ascii_case(leaf));
    }
}

fn split_leaf(key: &str) -> Option<(&str, &str)> {
    let key = key.trim_end_matches(':');
    match key.rfind("::") {
        Some(i) => Some((&key[..i], &key[i + 2..])),
        None if key.is_empty() => None,
        None => Some(("", key)),
    }
}

/// The boolean spellings the configuration and tag files accept.
pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("with")
        || value.eq_ignore_ascii_case("on")
        || value.eq_ignore_ascii_case("enable")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("without")
        || value.eq_ignore_ascii_case("off")
        || value.eq_ignore_ascii_case("disable")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_find() {
        let mut config = Configuration::new();
        config.set("Acquire::http::Proxy", "http://proxy:3128");
        assert_eq!(config.find("Acquire::http::Proxy", ""), "http://proxy:3128");
        assert_eq!(config.find("acquire::HTTP::proxy", ""), "http://proxy:3128");
        assert_eq!(config.find("Acquire::https::Proxy", "direct"), "direct");
    }

    #[test]
    fn cli_items() {
        let mut config = Configuration::new();
        config.set_cli_item("Acquire::Retries=3").unwrap();
        assert_eq!(config.find_int("Acquire::Retries", 0), 3);
        assert!(config.set_cli_item("novalue").is_err());
    }

    #[test]
    fn bool_spellings() {
        let mut config = Configuration::new();
        for (text, expect) in [("yes", true), ("on", true), ("without", false), ("0", false)] {
            config.set("Flag", text);
            assert_eq!(config.find_bool("Flag", !expect), expect, "{text}");
        }
        config.set("Flag", "maybe");
        assert!(config.find_bool("Flag", true));
        assert!(!config.find_bool("Flag", false));
    }

    #[test]
    fn list_append() {
        let mut config = Configuration::new();
        config.set("CompressTypes::", "gz");
        config.set("CompressTypes::", "xz");
        assert_eq!(config.find_vector("CompressTypes"), vec!["gz", "xz"]);
    }

    #[test]
    fn subtree_walk() {
        let mut config = Configuration::new();
        config.set("Compressor::gzip::Binary", "gzip");
        config.set("Compressor::zstd::Binary", "zstd");
        let names: Vec<String> = config
            .tree("Compressor")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["gzip", "zstd"]);
    }

    #[test]
    fn clear_removes_subtree() {
        let mut config = Configuration::new();
        config.set("A::B::C", "1");
        config.clear("A::B");
        assert!(!config.exists("A::B::C"));
        assert!(config.exists("A"));
    }
}
