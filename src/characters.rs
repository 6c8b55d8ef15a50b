//! Finalized character sheets, one per (submitter, name).

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;
use std::sync::Arc;

use crate::sheet::CharacterSheet;
use crate::store::Database;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCharacter {
    pub id: String,
    pub submitter_id: String,
    pub guild_id: Option<String>,
    pub fingerprint: String,
    pub sheet: CharacterSheet,
    pub updated_at: String,
}

pub struct CharacterStore {
    db: Arc<Database>,
}

impl CharacterStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the submitter's character with the same name.
    pub fn save(
        &self,
        submitter_id: &str,
        guild_id: Option<&str>,
        sheet: &CharacterSheet,
    ) -> Result<StoredCharacter> {
        let json = serde_json::to_string(sheet).context("failed to serialize sheet")?;
        let fingerprint = sheet.fingerprint();
        let now = Utc::now().to_rfc3339();
        let conn = self.db.lock();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM characters WHERE submitter_id = ?1 AND name = ?2",
                rusqlite::params![submitter_id, sheet.name],
                |row| row.get(0),
            )
            .optional()?;
        let id = existing.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        conn.execute(
            "INSERT INTO characters (id, submitter_id, guild_id, name, fingerprint, sheet, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                guild_id = excluded.guild_id,
                name = excluded.name,
                fingerprint = excluded.fingerprint,
                sheet = excluded.sheet,
                updated_at = excluded.updated_at",
            rusqlite::params![id, submitter_id, guild_id, sheet.name, fingerprint, json, now],
        )?;

        tracing::debug!(character_id = %id, submitter = submitter_id, "Saved character");
        Ok(StoredCharacter {
            id,
            submitter_id: submitter_id.to_string(),
            guild_id: guild_id.map(str::to_string),
            fingerprint,
            sheet: sheet.clone(),
            updated_at: now,
        })
    }

    /// Character by name (case-insensitive) for a submitter.
    pub fn find(&self, submitter_id: &str, name: &str) -> Result<Option<StoredCharacter>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT id, submitter_id, guild_id, fingerprint, sheet, updated_at
                 FROM characters WHERE submitter_id = ?1 AND name = ?2",
                rusqlite::params![submitter_id, name.trim()],
                read_row,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    /// Most recently updated character with this fingerprint, any owner.
    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<StoredCharacter>> {
        let conn = self.db.lock();
        let row = conn
            .query_row(
                "SELECT id, submitter_id, guild_id, fingerprint, sheet, updated_at
                 FROM characters WHERE fingerprint = ?1 ORDER BY updated_at DESC LIMIT 1",
                [fingerprint],
                read_row,
            )
            .optional()?;
        row.map(decode).transpose()
    }

    pub fn list(&self, submitter_id: &str) -> Result<Vec<StoredCharacter>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, submitter_id, guild_id, fingerprint, sheet, updated_at
             FROM characters WHERE submitter_id = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([submitter_id], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(decode).collect()
    }
}

type RawRow = (String, String, Option<String>, String, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode((id, submitter_id, guild_id, fingerprint, sheet, updated_at): RawRow) -> Result<StoredCharacter> {
    let sheet: CharacterSheet = serde_json::from_str(&sheet)
        .with_context(|| format!("corrupt sheet stored for character {id}"))?;
    Ok(StoredCharacter {
        id,
        submitter_id,
        guild_id,
        fingerprint,
        sheet,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::record::tests::sample_sheet;

    fn store() -> CharacterStore {
        CharacterStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn save_then_find_case_insensitive() {
        let s = store();
        let saved = s.save("u1", Some("g1"), &sample_sheet()).unwrap();
        let found = s.find("u1", "hana seo").unwrap().unwrap();
        assert_eq!(found.id, saved.id);
        assert_eq!(found.sheet, sample_sheet());
        assert_eq!(found.fingerprint, sample_sheet().fingerprint());
        assert!(s.find("u2", "Hana Seo").unwrap().is_none());
    }

    #[test]
    fn saving_same_name_replaces() {
        let s = store();
        let first = s.save("u1", None, &sample_sheet()).unwrap();
        let mut edited = sample_sheet();
        edited.age = 18;
        let second = s.save("u1", None, &edited).unwrap();
        assert_eq!(first.id, second.id);
        let all = s.list("u1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].sheet.age, 18);
        assert_ne!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn find_by_fingerprint_returns_owner() {
        let s = store();
        let saved = s.save("u1", Some("g1"), &sample_sheet()).unwrap();
        let found = s.find_by_fingerprint(&saved.fingerprint).unwrap().unwrap();
        assert_eq!(found.submitter_id, "u1");
        assert!(s.find_by_fingerprint("nope").unwrap().is_none());
    }

    #[test]
    fn list_is_per_submitter() {
        let s = store();
        s.save("u1", None, &sample_sheet()).unwrap();
        let mut other = sample_sheet();
        other.name = "Jun".into();
        s.save("u1", None, &other).unwrap();
        s.save("u2", None, &sample_sheet()).unwrap();
        assert_eq!(s.list("u1").unwrap().len(), 2);
        assert_eq!(s.list("u2").unwrap().len(), 1);
    }
}
