use sea_orm_migration::prelude::*;
use std::env;

use migration::Migrator;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let db_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("up");

    let db = sea_orm::Database::connect(&db_url).await
        .expect("Failed to connect to database");

    let result = match command {
        "up" => Migrator::up(&db, None).await.map(|_| "Migrations applied"),
        "down" => Migrator::down(&db, Some(1)).await.map(|_| "Last migration rolled back"),
        "fresh" => Migrator::fresh(&db).await.map(|_| "Schema recreated from scratch"),
        "status" => Migrator::status(&db).await.map(|_| "Status listed above"),
        _ => {
            eprintln!("Unknown command: {}. Use: up, down, fresh, or status", command);
            std::process::exit(1);
        }
    };

    match result {
        Ok(message) => println!("{}", message),
        Err(e) => {
            eprintln!("Migration command '{}' failed: {}", command, e);
            std::process::exit(1);
        }
    }
}
