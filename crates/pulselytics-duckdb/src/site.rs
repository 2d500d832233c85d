use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::DuckDbBackend;

/// A registered site. Timestamps come back as DuckDB's VARCHAR cast of
/// `CURRENT_TIMESTAMP`; they are display-only and never parsed.
#[derive(Debug, Clone, Serialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSiteParams {
    pub name: String,
    pub domain: String,
}

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Site ids are `site_` plus ten lowercase alphanumerics, short enough to
/// paste into a tracking snippet.
pub fn generate_site_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..10)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect();
    format!("site_{suffix}")
}

impl DuckDbBackend {
    pub async fn create_site(&self, params: &CreateSiteParams) -> Result<Site> {
        let id = generate_site_id();
        {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO sites (id, name, domain) VALUES (?1, ?2, ?3)",
                duckdb::params![id, params.name, params.domain],
            )?;
        }
        self.get_site(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("site {id} vanished after insert"))
    }

    pub async fn get_site(&self, id: &str) -> Result<Option<Site>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, domain,
                    CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
             FROM sites WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(duckdb::params![id], |row| {
            Ok(Site {
                id: row.get(0)?,
                name: row.get(1)?,
                domain: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, domain,
                    CAST(created_at AS VARCHAR), CAST(updated_at AS VARCHAR)
             FROM sites ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Site {
                id: row.get(0)?,
                name: row.get(1)?,
                domain: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        let mut sites = Vec::new();
        for row in rows {
            sites.push(row?);
        }
        Ok(sites)
    }

    /// Upsert a site with a fixed id. Used at startup when `PULSELYTICS_SEED_SITE`
    /// is set, so local setups get a known id without a registration call.
    pub async fn seed_site(&self, id: &str, name: &str, domain: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sites (id, name, domain) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 domain = excluded.domain,
                 updated_at = CURRENT_TIMESTAMP",
            duckdb::params![id, name, domain],
        )?;
        Ok(())
    }
}
