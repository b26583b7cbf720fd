pub mod resolve;
pub mod schema;
pub mod seed;
pub mod storage;

pub use resolve::{
    Assembler, AssociationMap, AssociationSpec, CollectionPolicy, CollectionReport, DocValue,
    Document, Materializer, ResolveError, ResolveResult,
};
pub use schema::{incident_registry, Registry, RegistryError};
pub use seed::{seed_reference_catalog, CatalogSeed, SeedError, SeedReport};
pub use storage::{
    InMemoryBackend, SimpleStorage, StorageBackend, StorageError, StorageOp, StorageResult,
};
