use std::env;

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use uuid::Uuid;

use jobportal::{
    auth::password::{hash_password, MIN_PASSWORD_LENGTH},
    config::AppConfig,
    db,
    domain::Role,
    models::NewUser,
    schema::users,
};

const USAGE: &str = "Usage: create_admin <email> <password> <name>";

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().skip(1).collect();
    let [email, password, name] = args.as_slice() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        bail!("'{email}' is not an email address");
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        bail!("password must be at least {MIN_PASSWORD_LENGTH} characters");
    }
    if name.trim().is_empty() {
        bail!("name must not be empty");
    }

    let config = AppConfig::from_env()?;
    tracing_subscriber::fmt().with_target(false).compact().init();
    tracing::info!(
        component = "create_admin",
        database_url = %config.redacted_database_url(),
        "loaded backend configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    db::run_migrations(&mut conn)?;

    let admin = NewUser {
        id: Uuid::new_v4(),
        email: email.clone(),
        password_hash: hash_password(password)?,
        name: name.trim().to_string(),
        role: Role::Admin.as_str().to_string(),
        company_name: None,
    };

    match diesel::insert_into(users::table)
        .values(&admin)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            bail!("an account with email {email} already exists");
        }
        Err(err) => return Err(err).context("failed to insert admin account"),
    }

    println!("Created admin {} ({})", email, admin.id);
    Ok(())
}
