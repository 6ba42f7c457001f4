//! Schema migrations, declared with cetane and applied by
//! [`crate::repository::migrations::run_migrations`].

mod m0001_initial;
mod m0002_document_texts;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_initial::migration());
    reg.register(m0002_document_texts::migration());
    reg
}
