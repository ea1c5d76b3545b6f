use ulid::Ulid;

/// Identifier for store handles and migration runs; sorts by creation time.
pub fn new_ulid_string() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_ulids() {
        let a = new_ulid_string();
        let b = new_ulid_string();
        assert!(Ulid::from_string(&a).is_ok());
        assert_ne!(a, b);
    }
}
