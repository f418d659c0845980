use std::env;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use startupmatch::{
    auth::password::{check_password_strength, hash_password},
    config::AppConfig,
    db,
    models::{NewOrganizationProfile, NewUser},
    schema::{organization_profiles, refresh_tokens, users},
    status::UserRole,
};

const USAGE: &str = "Usage:\n  maintenance create-admin <email> <password>\n  maintenance hash-password <password>\n  maintenance purge-refresh-tokens";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["create-admin", email, password] => create_admin(email, password)?,
        ["hash-password", password] => println!("{}", hash_password(password)?),
        ["purge-refresh-tokens"] => purge_refresh_tokens()?,
        [cmd, ..] => {
            eprintln!("Unknown command or arguments: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        [] => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    db::init_pool_with_size(&config.database_url, 1)
}

/// Promotes an existing account, or creates an organization account with
/// admin rights when the email is unknown.
fn create_admin(email: &str, password: &str) -> Result<()> {
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        bail!("'{email}' is not an email address");
    }
    if let Err(reason) = check_password_strength(password) {
        bail!("password rejected: {reason}");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let password_hash = hash_password(password)?;

    let promoted = diesel::update(users::table.filter(users::email.eq(&email)))
        .set((
            users::is_admin.eq(true),
            users::is_active.eq(true),
            users::password_hash.eq(&password_hash),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .context("failed to update existing user")?;
    if promoted > 0 {
        println!("Granted admin rights to {email}.");
        return Ok(());
    }

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let id = Uuid::new_v4();
        diesel::insert_into(users::table)
            .values(&NewUser {
                id,
                email: email.clone(),
                password_hash,
                full_name: "Administrator".to_string(),
                role: UserRole::Organization.as_str().to_string(),
                is_admin: true,
            })
            .execute(conn)?;
        diesel::insert_into(organization_profiles::table)
            .values(&NewOrganizationProfile { user_id: id })
            .execute(conn)?;
        Ok(())
    })
    .context("failed to create admin user")?;

    println!("Created admin account {email}.");
    Ok(())
}

/// Removes refresh tokens that are expired or were revoked.
fn purge_refresh_tokens() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let now = Utc::now().naive_utc();
    let removed = diesel::delete(
        refresh_tokens::table.filter(
            refresh_tokens::expires_at
                .lt(now)
                .or(refresh_tokens::revoked_at.is_not_null()),
        ),
    )
    .execute(&mut conn)
    .context("failed to purge refresh tokens")?;
    println!("Removed {removed} refresh tokens.");
    Ok(())
}
