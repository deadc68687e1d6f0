use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConvoError, Result};

/// The four namespaces an [`ItemId`] can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Lexeme,
    Gram,
    Colloc,
    Repair,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Lexeme => "lexeme",
            ItemKind::Gram => "gram",
            ItemKind::Colloc => "colloc",
            ItemKind::Repair => "repair",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "lexeme" => Ok(ItemKind::Lexeme),
            "gram" => Ok(ItemKind::Gram),
            "colloc" => Ok(ItemKind::Colloc),
            "repair" => Ok(ItemKind::Repair),
            other => Err(format!("unknown item kind: {other}")),
        }
    }
}

/// Opaque identifier of form `kind:value` — e.g. `lexeme:의자`, `gram:전에`.
///
/// The wire format is the canonical representation; callers that need the
/// parts should use [`ItemId::kind`]/[`ItemId::value`] rather than splitting
/// the string themselves, since `value` may itself contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(kind: ItemKind, value: &str) -> Self {
        Self(format!("{kind}:{value}"))
    }

    pub fn lexeme(value: &str) -> Self {
        Self::new(ItemKind::Lexeme, value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> Option<ItemKind> {
        let (kind, _) = self.0.split_once(':')?;
        kind.parse().ok()
    }

    pub fn value(&self) -> Option<&str> {
        let (_, value) = self.0.split_once(':')?;
        Some(value)
    }

    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| ConvoError::InvalidItemId(s.clone()))?;
        if kind.parse::<ItemKind>().is_err() || value.is_empty() {
            return Err(ConvoError::InvalidItemId(s));
        }
        Ok(Self(s))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.0
    }
}
