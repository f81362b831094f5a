pub mod ad_event;
pub mod event_logger;
