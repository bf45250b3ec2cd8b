//! The composite key identifying one generation.

use std::fmt;
use std::str::FromStr;

use crate::IdError;

/// Separator between BuildId components in the canonical string form.
pub const SEPARATOR: char = ':';

/// Generation number within an `(app_name, data_table)` family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationId(u32);

impl GenerationId {
    /// Creates a new GenerationId.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenerationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| IdError::InvalidGeneration(s.to_string()))
    }
}

impl From<u32> for GenerationId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl serde::Serialize for GenerationId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for GenerationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u32::deserialize(deserializer).map(Self)
    }
}

/// Immutable identifier of one generation: `(app_name, data_table, generation_id)`.
///
/// Ordering is lexicographic over the three components, which groups all
/// generations of one table family together in ordered maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildId {
    app_name: String,
    data_table: String,
    generation_id: GenerationId,
}

impl BuildId {
    /// Creates a BuildId, validating the name components.
    pub fn new(
        app_name: impl Into<String>,
        data_table: impl Into<String>,
        generation_id: impl Into<GenerationId>,
    ) -> Result<Self, IdError> {
        let app_name = app_name.into();
        let data_table = data_table.into();
        validate_component("app name", &app_name)?;
        validate_component("data table", &data_table)?;

        Ok(Self {
            app_name,
            data_table,
            generation_id: generation_id.into(),
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn data_table(&self) -> &str {
        &self.data_table
    }

    pub fn generation_id(&self) -> GenerationId {
        self.generation_id
    }

    /// Key shared by all generations of the same table family.
    pub fn family(&self) -> (&str, &str) {
        (&self.app_name, &self.data_table)
    }

    /// Parses the canonical `app:table:generation` form.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let mut parts = s.split(SEPARATOR);
        let (Some(app), Some(table), Some(generation), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(IdError::InvalidFormat {
                message: format!("expected app{SEPARATOR}table{SEPARATOR}generation, got '{s}'"),
            });
        };

        Self::new(app, table, generation.parse::<GenerationId>()?)
    }
}

fn validate_component(component: &'static str, value: &str) -> Result<(), IdError> {
    let valid = !value.is_empty()
        && !value.contains(SEPARATOR)
        && !value.contains('/')
        && !value.chars().any(char::is_whitespace);

    if valid {
        Ok(())
    } else {
        Err(IdError::InvalidComponent {
            component,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.app_name, self.data_table, self.generation_id
        )
    }
}

impl FromStr for BuildId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for BuildId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for BuildId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bid(app: &str, table: &str, generation: u32) -> BuildId {
        BuildId::new(app, table, generation).unwrap()
    }

    #[test]
    fn test_display_and_parse() {
        let id = bid("search.products", "products", 7);
        assert_eq!(id.to_string(), "search.products:products:7");
        assert_eq!(BuildId::parse("search.products:products:7").unwrap(), id);
    }

    #[test]
    fn test_structural_equality() {
        let a = bid("app", "table", 1);
        let b = BuildId::parse("app:table:1").unwrap();
        assert_eq!(a, b);

        let mut set = std::collections::HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_ordering_groups_families() {
        let mut ids = vec![
            bid("b", "t", 1),
            bid("a", "t", 10),
            bid("a", "t", 2),
            bid("a", "s", 99),
        ];
        ids.sort();
        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a:s:99", "a:t:2", "a:t:10", "b:t:1"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(BuildId::parse(""), Err(IdError::Empty)));
        assert!(matches!(
            BuildId::parse("app:table"),
            Err(IdError::InvalidFormat { .. })
        ));
        assert!(matches!(
            BuildId::parse("app:table:1:extra"),
            Err(IdError::InvalidFormat { .. })
        ));
        assert!(matches!(
            BuildId::parse("app:table:-1"),
            Err(IdError::InvalidGeneration(_))
        ));
        assert!(matches!(
            BuildId::parse(":table:1"),
            Err(IdError::InvalidComponent { component: "app name", .. })
        ));
    }

    #[test]
    fn test_reserved_characters_rejected() {
        assert!(BuildId::new("a/b", "t", 1).is_err());
        assert!(BuildId::new("a", "t b", 1).is_err());
    }

    #[test]
    fn test_json_is_canonical_string() {
        let id = bid("app", "table", 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"app:table:3\"");
        let parsed: BuildId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    proptest! {
        #[test]
        fn prop_parse_display_roundtrip(
            app in "[a-z][a-z0-9._-]{0,15}",
            table in "[a-z][a-z0-9_]{0,15}",
            generation in any::<u32>(),
        ) {
            let id = BuildId::new(app, table, generation).unwrap();
            let reparsed = BuildId::parse(&id.to_string()).unwrap();
            prop_assert_eq!(id, reparsed);
        }
    }
}
