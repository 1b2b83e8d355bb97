#![allow(non_snake_case)]

// Данные и формат
pub mod consts;
pub mod snapshot;
pub mod codec;

// Инфраструктура
pub mod exec;
pub mod metrics;
pub mod config;

// Хранилища
pub mod disk;   // src/disk/{mod,file}.rs
pub mod memory;
pub mod identity;

// Оркестратор и его соседи
pub mod flush;
pub mod lifecycle;
pub mod report;
pub mod size;
pub mod stash;

// Офлайн-инспекция каталога (CLI)
pub mod inspect;

// Удобные реэкспорты
pub use config::{StashBuilder, StashConfig};
pub use disk::{FileStore, RecordStore};
pub use flush::FlushOutcome;
pub use identity::token_key;
pub use lifecycle::LifecycleEvent;
pub use report::{LogReporter, Reporter, SizeExceeded};
pub use size::SizeTree;
pub use snapshot::{Bitmap, Carrier, Handle, PixelFormat, Snapshot, Value};
pub use stash::Stash;
