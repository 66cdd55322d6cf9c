//! Time-sortable message ids.
//!
//! Room messages use UUID v7: the server stamps each message on receipt, so
//! id order and server-receipt order agree and clients can merge history
//! and live traffic by sorting on the id alone.

use uuid::Uuid;

/// Generate a new message id (UUID v7).
pub fn generate_id() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(generate_id(), generate_id());
    }

    #[test]
    fn ids_sort_in_creation_order() {
        let id1 = generate_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = generate_id();
        assert!(id1 < id2);
    }
}
