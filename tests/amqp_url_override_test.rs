//! `AMQP_URL` takes precedence over the configured broker URL
//!
//! Kept in its own test binary: it mutates the process environment.

use std::fs;

use arnavon_core::config::{ConfigManager, QueueConfig};
use tempfile::TempDir;

#[test]
fn test_amqp_url_env_overrides_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("arnavon.yml");
    fs::write(
        &path,
        "queue:\n  driver: amqp\n  url: amqp://localhost\n  topology:\n    exchanges:\n      - { name: jobs, default: true }\n",
    )
    .unwrap();

    std::env::set_var("AMQP_URL", "amqp://ops:pw@broker.example:5673/prod");
    let manager = ConfigManager::load_from_file(&path).unwrap();
    std::env::remove_var("AMQP_URL");

    let QueueConfig::Amqp(amqp) = &manager.config().queue else {
        panic!("amqp driver expected");
    };
    assert_eq!(amqp.url, "amqp://ops:pw@broker.example:5673/prod");
    let management = amqp.management_config().unwrap();
    assert_eq!(management.url, "http://broker.example:15672");
    assert_eq!(management.vhost, "prod");
}
