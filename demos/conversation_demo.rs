//! # Conversation Demo
//!
//! Walks through a three-party conversation: identity creation, session key
//! distribution, messaging, and a PIN-protected backup restored on a new
//! device.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example conversation_demo
//! ```

use std::sync::Arc;

use umbra_e2ee::remote::memory::{InMemoryBackupStorage, InMemoryDirectory, InMemoryKeyServer};
use umbra_e2ee::{E2eeConfig, E2eeContext, Error, RemoteServices};

struct Network {
    directory: Arc<InMemoryDirectory>,
    key_server: Arc<InMemoryKeyServer>,
}

impl Network {
    fn device(&self, user: &str, secret: u8, backups: Arc<InMemoryBackupStorage>) -> E2eeContext {
        let remote = RemoteServices {
            directory: self.directory.clone(),
            distribution: Arc::new(self.key_server.client(user)),
            backup_storage: backups,
        };
        let ctx = E2eeContext::open(E2eeConfig::default(), &[secret; 32], remote)
            .expect("Failed to open context");

        ctx.keystore().set_active_identity(Some(user));
        let public = ctx
            .keystore()
            .generate_and_store_identity_key_pair()
            .expect("Failed to create identity");
        self.directory
            .register(user, &public)
            .expect("Failed to register public key");

        println!("  {} registered an RSA-{} identity", user, public.bits());
        ctx
    }
}

#[tokio::main]
async fn main() {
    println!("=== Umbra E2EE: Conversation Demo ===\n");

    let network = Network {
        directory: Arc::new(InMemoryDirectory::new()),
        key_server: InMemoryKeyServer::new(),
    };
    let alice_backups = Arc::new(InMemoryBackupStorage::new());

    // Step 1: Identities
    println!("Step 1: Creating identities...");
    let alice = network.device("alice", 1, alice_backups.clone());
    let bob = network.device("bob", 2, Arc::new(InMemoryBackupStorage::new()));
    let carol = network.device("carol", 3, Arc::new(InMemoryBackupStorage::new()));
    println!();

    // Step 2: Conversation setup (dave never registered)
    println!("Step 2: Alice starts a conversation...");
    let participants: Vec<String> = ["alice", "bob", "carol", "dave"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = alice
        .sessions()
        .setup_conversation_encryption("book-club", &participants)
        .await
        .expect("Setup failed");
    println!("  Delivered to:   {:?}", report.delivered);
    println!("  Unreachable:    {:?}", report.unreachable);
    println!("  Outcome:        {:?}", report.outcome());
    println!();

    // Step 3: Messaging
    println!("Step 3: Exchanging messages...");
    let payload = alice
        .sessions()
        .encrypt_message(b"Chapter 4 on Thursday?", "book-club")
        .await
        .expect("No key for book-club");
    println!(
        "  Wire payload: {}",
        payload.to_json().expect("Serialization failed")
    );

    for (name, ctx) in [("bob", &bob), ("carol", &carol)] {
        match ctx.sessions().decrypt_payload(&payload, "book-club").await {
            Some(plain) => println!("  {} reads: {}", name, String::from_utf8_lossy(&plain)),
            None => println!("  [FAILED] {} could not decrypt", name),
        }
    }
    println!();

    // Step 4: Backup
    println!("Step 4: Alice backs up her keys with a PIN...");
    let blob = alice
        .backups()
        .create_and_upload_backup("482916")
        .await
        .expect("Backup failed");
    println!(
        "  Backed up {} conversation(s) with {} PBKDF2 rounds",
        blob.conversation_ids.len(),
        blob.kdf_iterations
    );
    println!();

    // Step 5: Restore on a new phone
    println!("Step 5: Alice restores on a new device...");
    let new_phone = network.device("alice", 9, alice_backups);

    match new_phone.backups().restore_backup("000000").await {
        Err(Error::IncorrectPin) => println!("  Wrong PIN rejected"),
        other => println!("  [UNEXPECTED] {:?}", other.map(|r| r.restored)),
    }

    let restored = new_phone
        .backups()
        .restore_backup("482916")
        .await
        .expect("Restore failed");
    println!("  Restored: {:?}", restored.restored);

    let plain = new_phone
        .sessions()
        .decrypt_payload(&payload, "book-club")
        .await
        .expect("Restored key does not decrypt");
    println!("  Old message still readable: {}", String::from_utf8_lossy(&plain));

    println!("\n=== Demo Complete ===");
}
