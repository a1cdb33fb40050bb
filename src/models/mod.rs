pub mod event;
pub mod meeting;
pub mod planner;
pub mod preference;
pub mod settings;
pub mod timeslot;
