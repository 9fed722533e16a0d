//! Reset the database to a small known user set with a couple of
//! conversations. Users are only ever created here; the relay itself
//! never creates or deletes them.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use chirp_db::Database;
use chirp_db::models::NewMessage;
use chirp_gateway::resolver;
use chirp_server::config::Config;
use chirp_types::models::MessageStatus;

const SEED_PASSWORD: &str = "pass1234";

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    chirp_server::init_tracing("chirp_seed=info,chirp_db=info");

    let config = Config::from_env()?;
    let db = Database::open(&config.db_path)?;

    db.wipe()?;
    info!("Wiped messages, conversations and users");

    let hash = chirp_server::hash_password(SEED_PASSWORD)?;
    let alice = create_user(&db, "Alice", "alice@test.com", &hash)?;
    let bob = create_user(&db, "Bob", "bob@test.com", &hash)?;
    let test = create_user(&db, "Test User", "test1@example.com", &hash)?;
    info!("Users created: {} {} {}", alice, bob, test);

    let alice_bob = resolver::find_or_create(&db, alice, bob)?;
    insert(&db, alice_bob.id, alice, bob, "Hello Bob! This is Alice (seed).", MessageStatus::Delivered)?;

    let bob_test = resolver::find_or_create(&db, bob, test)?;
    insert(&db, bob_test.id, test, bob, "Hey Bob, test message from Test User.", MessageStatus::Sent)?;

    info!("Seed finished");
    Ok(())
}

fn create_user(db: &Database, name: &str, email: &str, hash: &str) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    db.create_user(id, name, email, hash)?;
    Ok(id)
}

fn insert(
    db: &Database,
    conversation_id: Uuid,
    from: Uuid,
    to: Uuid,
    text: &str,
    status: MessageStatus,
) -> anyhow::Result<()> {
    let now = Utc::now();
    db.insert_message(&NewMessage {
        id: Uuid::new_v4(),
        conversation_id,
        from,
        to,
        text: text.to_string(),
        status,
        created_at: now,
    })?;
    db.touch_conversation(conversation_id, now)?;
    Ok(())
}
