use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Mission progress is a percentage.
pub const MAX_PROGRESS: u8 = 100;

/// The single current-state record for one user.
///
/// Saving a snapshot replaces the stored one wholesale; callers that want
/// incremental updates read, modify and save again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProgressSnapshot {
    pub id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "realmProgress", default)]
    pub realm_progress: Vec<RealmProgress>,
    #[serde(rename = "missionProgress", default)]
    pub mission_progress: Vec<MissionProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RealmProgress {
    #[serde(rename = "realmId")]
    pub realm_id: i64,
    pub completed: bool,
    #[serde(rename = "missionsCompleted", default)]
    pub missions_completed: Vec<i64>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct MissionProgress {
    #[serde(rename = "missionId")]
    pub mission_id: i64,
    pub progress: u8,
    pub completed: bool,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Empty snapshot for a user. The record id is the user id.
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            id: user_id.clone(),
            user_id,
            realm_progress: Vec::new(),
            mission_progress: Vec::new(),
        }
    }

    pub fn realm(&self, realm_id: i64) -> Option<&RealmProgress> {
        self.realm_progress.iter().find(|r| r.realm_id == realm_id)
    }

    pub fn mission(&self, mission_id: i64) -> Option<&MissionProgress> {
        self.mission_progress.iter().find(|m| m.mission_id == mission_id)
    }

    fn realm_mut(&mut self, realm_id: i64) -> &mut RealmProgress {
        let index = match self.realm_progress.iter().position(|r| r.realm_id == realm_id) {
            Some(index) => index,
            None => {
                self.realm_progress.push(RealmProgress {
                    realm_id,
                    completed: false,
                    missions_completed: Vec::new(),
                    last_updated: Utc::now(),
                });
                self.realm_progress.len() - 1
            }
        };
        &mut self.realm_progress[index]
    }

    /// Set a mission's progress, clamped to 100. Reaching 100 completes it.
    pub fn record_mission(&mut self, mission_id: i64, progress: u8) {
        let progress = progress.min(MAX_PROGRESS);
        let now = Utc::now();
        match self.mission_progress.iter_mut().find(|m| m.mission_id == mission_id) {
            Some(mission) => {
                mission.progress = progress;
                mission.completed = progress == MAX_PROGRESS;
                mission.last_updated = now;
            }
            None => self.mission_progress.push(MissionProgress {
                mission_id,
                progress,
                completed: progress == MAX_PROGRESS,
                last_updated: now,
            }),
        }
    }

    /// Mark a mission as completed inside a realm, creating the realm entry
    /// if needed. Completing the same mission twice is a no-op on the list.
    pub fn complete_mission_in_realm(&mut self, realm_id: i64, mission_id: i64) {
        let realm = self.realm_mut(realm_id);
        if !realm.missions_completed.contains(&mission_id) {
            realm.missions_completed.push(mission_id);
        }
        realm.last_updated = Utc::now();
        self.record_mission(mission_id, MAX_PROGRESS);
    }

    pub fn mark_realm_completed(&mut self, realm_id: i64) {
        let realm = self.realm_mut(realm_id);
        realm.completed = true;
        realm.last_updated = Utc::now();
    }

    pub fn completed_missions_count(&self) -> usize {
        self.mission_progress.iter().filter(|m| m.completed).count()
    }

    /// Check every invariant a stored snapshot must satisfy.
    pub fn validate(&self) -> StoreResult<()> {
        if self.user_id.is_empty() {
            return Err(StoreError::InvalidRecord("snapshot has an empty userId".into()));
        }
        if self.id != self.user_id {
            return Err(StoreError::InvalidRecord(format!(
                "snapshot id {:?} does not match userId {:?}",
                self.id, self.user_id
            )));
        }

        let mut realms = HashSet::new();
        for realm in &self.realm_progress {
            if !realms.insert(realm.realm_id) {
                return Err(StoreError::InvalidRecord(format!(
                    "realm {} appears more than once",
                    realm.realm_id
                )));
            }
            let mut seen = HashSet::new();
            if let Some(dup) = realm.missions_completed.iter().find(|id| !seen.insert(**id)) {
                return Err(StoreError::InvalidRecord(format!(
                    "realm {} lists mission {} twice",
                    realm.realm_id, dup
                )));
            }
        }

        let mut missions = HashSet::new();
        for mission in &self.mission_progress {
            if !missions.insert(mission.mission_id) {
                return Err(StoreError::InvalidRecord(format!(
                    "mission {} appears more than once",
                    mission.mission_id
                )));
            }
            if mission.progress > MAX_PROGRESS {
                return Err(StoreError::InvalidRecord(format!(
                    "mission {} progress {} is above {}",
                    mission.mission_id, mission.progress, MAX_PROGRESS
                )));
            }
            if mission.completed && mission.progress != MAX_PROGRESS {
                return Err(StoreError::InvalidRecord(format!(
                    "mission {} is completed at {}%",
                    mission.mission_id, mission.progress
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_snapshot_uses_user_id() {
        let snapshot = ProgressSnapshot::new("u1");
        assert_eq!(snapshot.id, "u1");
        assert_eq!(snapshot.user_id, "u1");
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_record_mission_clamps_and_completes() {
        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.record_mission(7, 40);
        assert_eq!(snapshot.mission(7).map(|m| m.progress), Some(40));
        assert!(!snapshot.mission(7).map(|m| m.completed).unwrap_or(true));

        snapshot.record_mission(7, 250);
        let mission = snapshot.mission(7).expect("mission recorded");
        assert_eq!(mission.progress, 100);
        assert!(mission.completed);
        assert_eq!(snapshot.mission_progress.len(), 1);
    }

    #[test]
    fn test_complete_mission_in_realm_no_duplicates() {
        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.complete_mission_in_realm(1, 2);
        snapshot.complete_mission_in_realm(1, 2);
        snapshot.complete_mission_in_realm(1, 3);

        let realm = snapshot.realm(1).expect("realm created");
        assert_eq!(realm.missions_completed, vec![2, 3]);
        assert_eq!(snapshot.completed_missions_count(), 2);
        assert!(snapshot.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_completed_below_100() {
        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.mission_progress.push(MissionProgress {
            mission_id: 1,
            progress: 80,
            completed: true,
            last_updated: Utc::now(),
        });
        assert!(matches!(snapshot.validate(), Err(StoreError::InvalidRecord(_))));
    }

    #[test]
    fn test_validate_rejects_progress_above_100() {
        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.mission_progress.push(MissionProgress {
            mission_id: 1,
            progress: 101,
            completed: false,
            last_updated: Utc::now(),
        });
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_missions_completed() {
        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.realm_progress.push(RealmProgress {
            realm_id: 1,
            completed: false,
            missions_completed: vec![1, 2, 1],
            last_updated: Utc::now(),
        });
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_id() {
        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.id = "other".to_string();
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = r#"{
            "id": "u1",
            "userId": "u1",
            "realmProgress": [{
                "realmId": 1,
                "completed": true,
                "missionsCompleted": [1, 2],
                "lastUpdated": "2024-01-01T00:00:00Z"
            }],
            "missionProgress": []
        }"#;
        let snapshot: ProgressSnapshot = serde_json::from_str(json).expect("valid snapshot json");
        assert_eq!(snapshot.realm_progress[0].missions_completed, vec![1, 2]);

        let value = serde_json::to_value(&snapshot).expect("serializable");
        assert_eq!(value["realmProgress"][0]["realmId"], 1);
        assert_eq!(value["userId"], "u1");
    }
}
