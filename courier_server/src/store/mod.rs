pub mod chat;
pub mod credentials;
pub mod deliveries;
pub mod devices;
pub mod memory;
pub mod templates;

pub use chat::{ChatStore, PgChatStore};
pub use credentials::{CredentialStore, PgCredentialStore};
pub use deliveries::{DeliveryStore, PgDeliveryStore};
pub use devices::{DeviceStore, PgDeviceStore};
pub use memory::{
  MemoryChatStore, MemoryCredentialStore, MemoryDeliveryStore, MemoryDeviceStore,
  MemoryTemplateStore,
};
pub use templates::{resolve_or_seed, PgTemplateStore, TemplateStore};
