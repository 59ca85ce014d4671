pub mod crud;

/// Task lifecycle states, as stored in the `status` column.
pub const VALID_STATUSES: &[&str] = &["pendiente", "en progreso", "completada"];
