pub mod event_repository;
pub mod planner_run_repository;
pub mod preference_repository;
