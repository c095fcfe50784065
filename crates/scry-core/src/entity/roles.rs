//! Voice-line based naming of AI-controlled entities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::EntityKind;

/// Display name and category assigned to an AI entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiRole {
    pub name: String,
    pub kind: EntityKind,
}

impl AiRole {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn fallback() -> Self {
        Self::new("AI", EntityKind::AiScav)
    }
}

/// Substring rule applied when no exact voice entry matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePattern {
    pub contains: String,
    #[serde(flatten)]
    pub role: AiRole,
}

/// Voice → role table. Lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiRoles {
    pub voices: HashMap<String, AiRole>,
    pub patterns: Vec<RolePattern>,
}

impl Default for AiRoles {
    fn default() -> Self {
        let pattern = |contains: &str, name: &str, kind| RolePattern {
            contains: contains.to_string(),
            role: AiRole::new(name, kind),
        };
        Self {
            voices: HashMap::new(),
            patterns: vec![
                pattern("scav", "Scav", EntityKind::AiScav),
                pattern("boss", "Boss", EntityKind::AiBoss),
                pattern("usec", "Usec", EntityKind::AiRaider),
                pattern("bear", "Bear", EntityKind::AiRaider),
                pattern("civilian", "Civ", EntityKind::AiScav),
            ],
        }
    }
}

impl AiRoles {
    pub fn resolve(&self, voice: &str) -> AiRole {
        if let Some(role) = self
            .voices
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(voice))
            .map(|(_, role)| role)
        {
            return role.clone();
        }
        let voice = voice.to_ascii_lowercase();
        self.patterns
            .iter()
            .find(|p| voice.contains(&p.contains.to_ascii_lowercase()))
            .map(|p| p.role.clone())
            .unwrap_or_else(AiRole::fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_voice_wins_over_pattern() {
        let mut roles = AiRoles::default();
        roles.voices.insert(
            "BossSanitar".to_string(),
            AiRole::new("Sanitar", EntityKind::AiBoss),
        );
        assert_eq!(roles.resolve("bosssanitar").name, "Sanitar");
        assert_eq!(roles.resolve("BossUnknown").name, "Boss");
    }

    #[test]
    fn test_unknown_voice_falls_back() {
        let roles = AiRoles::default();
        assert_eq!(roles.resolve("Whisper_3"), AiRole::fallback());
        assert_eq!(roles.resolve("Scav_2").kind, EntityKind::AiScav);
    }

    #[test]
    fn test_roles_from_toml() {
        let roles: AiRoles = toml::from_str(
            r#"
            [voices.SectantWarrior]
            name = "Cultist"
            kind = "ai_raider"

            [[patterns]]
            contains = "zombie"
            name = "Zombie"
            kind = "ai_scav"
            "#,
        )
        .unwrap();
        assert_eq!(roles.resolve("SectantWarrior").kind, EntityKind::AiRaider);
        assert_eq!(roles.resolve("Zombie_Fast").name, "Zombie");
        // an explicit table replaces the default patterns
        assert_eq!(roles.resolve("Scav_1"), AiRole::fallback());
    }
}
