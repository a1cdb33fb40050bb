pub mod blob_store;
pub mod break_scheduler;
pub mod buffer_stitcher;
pub mod event_parts;
pub mod identity;
pub mod meeting_assist;
pub mod planner_request;
pub mod planning_service;
pub mod reminder_service;
pub mod result_reconciler;
pub mod retry;
pub mod schedule_utils;
pub mod settings_service;
pub mod solver_client;
pub mod time_quantizer;
pub mod time_slots;
pub mod work_window;
