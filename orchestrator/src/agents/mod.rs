pub mod aggregator;
pub mod controller;
pub mod dispatcher;
pub mod grader;
pub mod planner;
pub mod summarizer;
