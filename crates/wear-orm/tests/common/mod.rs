#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use wear_orm::{Adapter, Json, Record};

pub async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create test pool")
}

/// Adapter over a fresh database holding every test table.
pub async fn test_db() -> Adapter<SqlitePool> {
    let mut db = Adapter::new(create_test_pool().await);
    db.must_create_table::<Payment>().await;
    db.must_create_table::<Note>().await;
    db.must_create_table::<User>().await;
    db.must_create_table::<Address>().await;
    db.must_create_table::<Passport>().await;
    db.must_create_table::<Team>().await;
    db.must_create_table::<UserTeam>().await;
    db
}

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 30, 0)
        .single()
        .expect("valid date")
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct Payment {
    pub id: i64,
    pub amount: f64,
    pub status: String,
    #[column(nullable)]
    pub note: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct Note {
    #[column(primary_key)]
    pub slug: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub bio: String,
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[table(name = "user")]
pub struct User {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub verified: bool,
    pub tags: Vec<String>,
    pub attrs: HashMap<String, String>,
    pub profile: Json<Profile>,
    #[column(skip)]
    pub scratch: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct Address {
    pub id: String,
    pub user_id: String,
    pub city: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct Passport {
    pub id: String,
    pub user_id: String,
    pub number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct Team {
    pub id: String,
    pub title: String,
}

/// Link record between users and teams.
#[derive(Debug, Clone, Default, PartialEq, Record)]
pub struct UserTeam {
    #[column(many_to_many)]
    pub link: (),
    pub id: String,
    pub user_id: String,
    pub team_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[table(name = "user")]
pub struct UserAddresses {
    pub id: String,
    pub name: String,
    #[column(join)]
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[table(name = "user")]
pub struct UserPassport {
    pub id: String,
    pub name: String,
    #[column(join)]
    pub passport: Option<Passport>,
}

#[derive(Debug, Clone, Default, PartialEq, Record)]
#[table(name = "user")]
pub struct UserTeams {
    pub id: String,
    pub name: String,
    #[column(join)]
    pub teams: Vec<Team>,
}

pub fn user(id: &str, name: &str, age: i32) -> User {
    User {
        id: id.to_string(),
        name: name.to_string(),
        age,
        ..User::default()
    }
}

pub fn address(id: &str, user_id: &str, city: &str) -> Address {
    Address {
        id: id.to_string(),
        user_id: user_id.to_string(),
        city: city.to_string(),
    }
}
