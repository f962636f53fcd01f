//! Knights and the users who act on them.
//!
//! A user is the account behind a request (the "actor"). A knight is the
//! in-game persona that earns experience; it may belong to one user.

use serde::{Deserialize, Serialize};

/// Cosmetic knight class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnightClass {
    Warrior,
    Mage,
    Archer,
}

impl KnightClass {
    #[cfg(test)]
    pub const ALL: [KnightClass; 3] = [KnightClass::Warrior, KnightClass::Mage, KnightClass::Archer];

    pub fn as_str(&self) -> &'static str {
        match self {
            KnightClass::Warrior => "warrior",
            KnightClass::Mage => "mage",
            KnightClass::Archer => "archer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "warrior" => Some(KnightClass::Warrior),
            "mage" => Some(KnightClass::Mage),
            "archer" => Some(KnightClass::Archer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Knight {
    pub id: i64,
    pub name: String,
    pub class: KnightClass,
    pub level: i32,
    pub experience: i32,
    pub owner_id: Option<i64>,
}

/// The user on whose behalf a core operation runs.
#[derive(Debug, Clone, Serialize)]
pub struct Actor {
    pub id: i64,
    pub name: String,
    /// Guild masters may act on any quest
    pub master: bool,
    /// Knights owned by this user, lowest id first
    pub knight_ids: Vec<i64>,
}

impl Actor {
    pub fn owns_knight(&self, knight_id: i64) -> bool {
        self.knight_ids.contains(&knight_id)
    }

    /// Knight credited for quests that have no owning knight
    pub fn primary_knight(&self) -> Option<i64> {
        self.knight_ids.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_parsing() {
        for class in KnightClass::ALL {
            assert_eq!(KnightClass::from_str(class.as_str()), Some(class));
        }
        assert_eq!(KnightClass::from_str("Mage"), Some(KnightClass::Mage));
        assert_eq!(KnightClass::from_str("bard"), None);
    }

    #[test]
    fn test_actor_ownership() {
        let actor = Actor {
            id: 1,
            name: "Aria".to_string(),
            master: false,
            knight_ids: vec![4, 9],
        };
        assert!(actor.owns_knight(9));
        assert!(!actor.owns_knight(5));
        assert_eq!(actor.primary_knight(), Some(4));
    }
}
