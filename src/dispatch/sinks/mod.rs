mod event_log;
mod mqtt;
mod notify;
mod storage;

pub use event_log::JsonlEventLog;
pub use mqtt::MqttSink;
pub use notify::{FallAlert, WebhookNotifier};
pub use storage::{build_clip_store, DirectoryClipStore, HttpClipStore};
