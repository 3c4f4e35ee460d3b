pub mod api;
pub mod models;

/// Canonical form of a username for lookups and uniqueness.
///
/// Every case-insensitive comparison in the system goes through this
/// function; stored display casing is kept separately.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// The account allowed to modify any event.
pub const ADMIN_USERNAME: &str = "admin";

pub fn is_admin(username: &str) -> bool {
    normalize_username(username) == ADMIN_USERNAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(normalize_username("  Mitsu "), "mitsu");
        assert_eq!(normalize_username("ZINE"), normalize_username("zine"));
    }

    #[test]
    fn admin_check_ignores_case() {
        assert!(is_admin("Admin"));
        assert!(is_admin("ADMIN"));
        assert!(!is_admin("administrator"));
    }
}
