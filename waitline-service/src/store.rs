use chrono::{DateTime, Duration, Utc};
use diesel::{
    dsl::{sql, sum},
    prelude::*,
    sql_types::{Nullable, Timestamptz},
};
use diesel_async::{scoped_futures::ScopedFutureExt, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::Config,
    models::{NewParty, Party, PartyStatus},
    schema::parties,
};

pub const PARTY_ID_LENGTH: usize = 10;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("party not found")]
    PartyNotFound,
    #[error("party could not be created")]
    PartyCouldNotBeCreated(#[source] diesel::result::Error),
    #[error("party could not be deleted")]
    PartyCouldNotBeDeleted(#[source] diesel::result::Error),
    #[error("party could not be read")]
    PartyUnreadable(#[source] diesel::result::Error),
    #[error("check-in state could not be updated")]
    PartyCouldNotCheckIn(#[source] diesel::result::Error),
    #[error("party could not be seated")]
    PartyCouldNotSetSeated(#[source] diesel::result::Error),
    #[error("available seats could not be read")]
    AvailableSeatsUnreadable(#[source] diesel::result::Error),
    #[error("queue positions could not be read")]
    QueueUnreadable(#[source] diesel::result::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedParty {
    pub party_id: String,
    pub position_in_queue: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePosition {
    pub party_id: String,
    pub row: i64,
}

/// Transactional operations over the `parties` table. Every method is a
/// single transaction; cross-operation serialization is the dequeue worker's
/// responsibility.
#[derive(Debug, Clone, Copy)]
pub struct PartyStore {
    max_seats: i32,
    checkin_expiry_seconds: i64,
    service_time_seconds: i64,
}

impl PartyStore {
    pub fn new(config: &Config) -> Self {
        Self {
            max_seats: config.max_seats,
            checkin_expiry_seconds: config.checkin_expiry_seconds,
            service_time_seconds: config.service_time_seconds,
        }
    }

    pub async fn get_by_party_id(
        &self,
        conn: &mut AsyncPgConnection,
        pid: &str,
    ) -> Result<Party, StoreError> {
        parties::table
            .filter(parties::party_id.eq(pid))
            .select(Party::as_select())
            .first(conn)
            .await
            .map_err(|err| match err {
                diesel::result::Error::NotFound => StoreError::PartyNotFound,
                err => StoreError::PartyUnreadable(err),
            })
    }

    /// Inserts a fresh `queued` party and computes its queue position inside
    /// the same transaction.
    pub async fn create(
        &self,
        conn: &mut AsyncPgConnection,
        name: &str,
        size: i32,
    ) -> Result<CreatedParty, StoreError> {
        let party = NewParty {
            id: Uuid::new_v4(),
            party_id: generate_party_id(),
            name: name.to_string(),
            size,
            status: PartyStatus::Queued,
        };

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let inserted: Party = diesel::insert_into(parties::table)
                    .values(&party)
                    .returning(Party::as_returning())
                    .get_result(conn)
                    .await?;

                let position_in_queue = parties::table
                    .filter(parties::status.eq(PartyStatus::Queued))
                    .filter(
                        parties::queued_at.lt(inserted.queued_at).or(parties::queued_at
                            .eq(inserted.queued_at)
                            .and(parties::party_id.le(inserted.party_id.clone()))),
                    )
                    .count()
                    .get_result::<i64>(conn)
                    .await?;

                Ok(CreatedParty {
                    party_id: inserted.party_id,
                    position_in_queue,
                })
            }
            .scope_boxed()
        })
        .await
        .map_err(StoreError::PartyCouldNotBeCreated)
    }

    pub async fn delete_by_party_id(
        &self,
        conn: &mut AsyncPgConnection,
        pid: &str,
    ) -> Result<(), StoreError> {
        let deleted = diesel::delete(parties::table.filter(parties::party_id.eq(pid)))
            .execute(conn)
            .await
            .map_err(StoreError::PartyCouldNotBeDeleted)?;

        if deleted == 0 {
            return Err(StoreError::PartyNotFound);
        }
        Ok(())
    }

    /// `MAX_SEATS` minus the seats held by seated parties whose service has
    /// not elapsed and by parties inside their check-in window.
    pub async fn available_seats(&self, conn: &mut AsyncPgConnection) -> Result<i32, StoreError> {
        let occupied: Option<i64> = parties::table
            .filter(
                parties::status
                    .eq(PartyStatus::Seated)
                    .and(parties::seat_expiration.gt(sql::<Nullable<Timestamptz>>("now()")))
                    .or(parties::status.eq(PartyStatus::CheckingIn)),
            )
            .select(sum(parties::size))
            .get_result(conn)
            .await
            .map_err(StoreError::AvailableSeatsUnreadable)?;

        Ok(self.max_seats - occupied.unwrap_or(0) as i32)
    }

    /// 1-based rows over the queued parties in canonical order.
    pub async fn current_queue_positions(
        &self,
        conn: &mut AsyncPgConnection,
    ) -> Result<Vec<QueuePosition>, StoreError> {
        let ids = self
            .queued_in_order(conn)
            .await
            .map_err(StoreError::QueueUnreadable)?;

        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(i, (party_id, _))| QueuePosition {
                party_id,
                row: i as i64 + 1,
            })
            .collect())
    }

    /// The longest prefix of the queue whose cumulative size fits into
    /// `available`. FIFO by construction: a head too large to fit blocks
    /// everything behind it.
    pub async fn parties_to_dequeue(
        &self,
        conn: &mut AsyncPgConnection,
        available: i32,
    ) -> Result<Vec<String>, StoreError> {
        let queued = self
            .queued_in_order(conn)
            .await
            .map_err(StoreError::QueueUnreadable)?;

        Ok(admissible_prefix(&queued, available))
    }

    /// Flips the given parties to `checking-in` with a shared expiration of
    /// `now() + CHECKIN_EXPIRY_SECONDS`. Returns `None` when no row matched.
    pub async fn set_checking_in(
        &self,
        conn: &mut AsyncPgConnection,
        pids: &[String],
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        if pids.is_empty() {
            return Ok(None);
        }

        let pids = pids.to_vec();
        let expiry = Duration::seconds(self.checkin_expiry_seconds);
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            async move {
                let expiration = db_now(conn).await? + expiry;
                let updated = diesel::update(
                    parties::table.filter(parties::party_id.eq_any(&pids)),
                )
                .set((
                    parties::status.eq(PartyStatus::CheckingIn),
                    parties::checkin_expiration.eq(expiration),
                ))
                .execute(conn)
                .await?;

                Ok(if updated == 0 { None } else { Some(expiration) })
            }
            .scope_boxed()
        })
        .await
        .map_err(StoreError::PartyCouldNotCheckIn)
    }

    /// Purges parties whose check-in window has elapsed; returns their ids.
    pub async fn delete_checkin_expired(
        &self,
        conn: &mut AsyncPgConnection,
    ) -> Result<Vec<String>, StoreError> {
        diesel::delete(
            parties::table
                .filter(parties::status.eq(PartyStatus::CheckingIn))
                .filter(parties::checkin_expiration.lt(sql::<Nullable<Timestamptz>>("now()"))),
        )
        .returning(parties::party_id)
        .get_results(conn)
        .await
        .map_err(StoreError::PartyCouldNotBeDeleted)
    }

    /// Seats a checking-in party for `SERVICE_TIME_SECONDS × size`. The
    /// `status = checking-in` guard rejects early and late check-in attempts.
    pub async fn set_seated(
        &self,
        conn: &mut AsyncPgConnection,
        pid: &str,
        size: i32,
    ) -> Result<DateTime<Utc>, StoreError> {
        let pid = pid.to_string();
        let service = Duration::seconds(self.service_time_seconds * i64::from(size));
        let seated = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let expiration = db_now(conn).await? + service;
                    let updated = diesel::update(
                        parties::table
                            .filter(parties::party_id.eq(pid))
                            .filter(parties::status.eq(PartyStatus::CheckingIn)),
                    )
                    .set((
                        parties::status.eq(PartyStatus::Seated),
                        parties::seat_expiration.eq(expiration),
                        parties::checkin_expiration.eq(None::<DateTime<Utc>>),
                    ))
                    .execute(conn)
                    .await?;

                    Ok((updated > 0).then_some(expiration))
                }
                .scope_boxed()
            })
            .await
            .map_err(StoreError::PartyCouldNotSetSeated)?;

        seated.ok_or(StoreError::PartyNotFound)
    }

    /// Removes seated parties whose service interval has elapsed.
    pub async fn remove_expired_seats(
        &self,
        conn: &mut AsyncPgConnection,
    ) -> Result<Vec<String>, StoreError> {
        diesel::delete(
            parties::table
                .filter(parties::status.eq(PartyStatus::Seated))
                .filter(parties::seat_expiration.lt(sql::<Nullable<Timestamptz>>("now()"))),
        )
        .returning(parties::party_id)
        .get_results(conn)
        .await
        .map_err(StoreError::PartyCouldNotBeDeleted)
    }

    async fn queued_in_order(
        &self,
        conn: &mut AsyncPgConnection,
    ) -> Result<Vec<(String, i32)>, diesel::result::Error> {
        parties::table
            .filter(parties::status.eq(PartyStatus::Queued))
            .order((parties::queued_at.asc(), parties::party_id.asc()))
            .select((parties::party_id, parties::size))
            .load(conn)
            .await
    }
}

/// Store-side clock; all admissibility timestamps originate here.
async fn db_now(conn: &mut AsyncPgConnection) -> Result<DateTime<Utc>, diesel::result::Error> {
    diesel::select(sql::<Timestamptz>("now()")).get_result(conn).await
}

fn generate_party_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PARTY_ID_LENGTH)
        .map(char::from)
        .collect()
}

fn admissible_prefix(queued: &[(String, i32)], available: i32) -> Vec<String> {
    let mut taken = Vec::new();
    let mut total = 0;
    for (party_id, size) in queued {
        total += size;
        if total > available {
            break;
        }
        taken.push(party_id.clone());
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(rows: &[(&str, i32)]) -> Vec<(String, i32)> {
        rows.iter().map(|(id, size)| (id.to_string(), *size)).collect()
    }

    #[test]
    fn prefix_admits_whole_queue_when_everything_fits() {
        let rows = queued(&[("P1", 4), ("P2", 3), ("P3", 3)]);
        assert_eq!(admissible_prefix(&rows, 10), vec!["P1", "P2", "P3"]);
    }

    #[test]
    fn prefix_stops_at_cumulative_bound() {
        let rows = queued(&[("P1", 8), ("P2", 2), ("P3", 2)]);
        assert_eq!(admissible_prefix(&rows, 10), vec!["P1", "P2"]);
    }

    #[test]
    fn oversized_head_blocks_smaller_parties_behind_it() {
        let rows = queued(&[("P1", 12), ("P2", 1)]);
        assert!(admissible_prefix(&rows, 10).is_empty());
    }

    #[test]
    fn prefix_of_empty_queue_is_empty() {
        assert!(admissible_prefix(&[], 10).is_empty());
    }

    #[test]
    fn exact_fit_is_admitted() {
        let rows = queued(&[("P1", 6), ("P2", 4)]);
        assert_eq!(admissible_prefix(&rows, 10), vec!["P1", "P2"]);
    }

    #[test]
    fn party_ids_are_ten_url_safe_characters() {
        for _ in 0..64 {
            let pid = generate_party_id();
            assert_eq!(pid.len(), PARTY_ID_LENGTH);
            assert!(pid.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
