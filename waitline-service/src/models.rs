use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    prelude::*,
    serialize::{self, IsNull, Output, ToSql},
};
use uuid::Uuid;

use crate::schema::parties;

#[derive(FromSqlRow, AsExpression, PartialEq, Eq, Copy, Clone, Debug)]
#[diesel(sql_type = crate::schema::sql_types::PartyStatus)]
pub enum PartyStatus {
    Queued,
    CheckingIn,
    Seated,
}

impl ToSql<crate::schema::sql_types::PartyStatus, Pg> for PartyStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        match *self {
            PartyStatus::Queued => out.write_all(b"queued")?,
            PartyStatus::CheckingIn => out.write_all(b"checking-in")?,
            PartyStatus::Seated => out.write_all(b"seated")?,
        }
        Ok(IsNull::No)
    }
}

impl FromSql<crate::schema::sql_types::PartyStatus, Pg> for PartyStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match bytes.as_bytes() {
            b"queued" => Ok(PartyStatus::Queued),
            b"checking-in" => Ok(PartyStatus::CheckingIn),
            b"seated" => Ok(PartyStatus::Seated),
            _ => Err("Unrecognized enum variant".into()),
        }
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone, PartialEq)]
#[diesel(table_name = parties)]
pub struct Party {
    pub id: Uuid,
    pub party_id: String,
    pub name: String,
    pub size: i32,
    pub status: PartyStatus,
    pub queued_at: DateTime<Utc>,
    pub checkin_expiration: Option<DateTime<Utc>>,
    pub seat_expiration: Option<DateTime<Utc>>,
}

/// Insertable subset; `queued_at` takes the database default.
#[derive(Insertable, Debug)]
#[diesel(table_name = parties)]
pub struct NewParty {
    pub id: Uuid,
    pub party_id: String,
    pub name: String,
    pub size: i32,
    pub status: PartyStatus,
}
