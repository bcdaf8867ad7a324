//! Salt rows. Append-only: the row with the greatest `created` is active.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::salt::{SALT_LEN, Salt, SaltStore};

/// Wire row for the `salts` table; the secret travels hex-encoded.
#[derive(Row, Serialize, Deserialize)]
struct SaltRow {
    salt: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::micros")]
    created: DateTime<Utc>,
}

pub struct ClickhouseSaltStore {
    client: Client,
}

impl ClickhouseSaltStore {
    pub fn new(client: Client) -> Self {
        ClickhouseSaltStore { client }
    }
}

fn decode(row: SaltRow) -> Result<Salt, ServiceError> {
    let raw = hex::decode(&row.salt)
        .map_err(|e| ServiceError::Fatal(format!("corrupt salt row: {}", e)))?;
    let bytes: [u8; SALT_LEN] = raw
        .try_into()
        .map_err(|_| ServiceError::Fatal("corrupt salt row: wrong length".to_string()))?;
    Ok(Salt {
        bytes,
        created: row.created,
    })
}

#[async_trait]
impl SaltStore for ClickhouseSaltStore {
    async fn latest(&self) -> Result<Option<Salt>, ServiceError> {
        let row = self
            .client
            .query("SELECT salt, created FROM salts ORDER BY created DESC LIMIT 1")
            .fetch_optional::<SaltRow>()
            .await?;
        row.map(decode).transpose()
    }

    async fn insert(&self, salt: &Salt) -> Result<(), ServiceError> {
        let mut insert = self.client.insert("salts")?;
        insert
            .write(&SaltRow {
                salt: hex::encode(salt.bytes),
                created: salt.created,
            })
            .await?;
        insert.end().await?;
        Ok(())
    }
}
