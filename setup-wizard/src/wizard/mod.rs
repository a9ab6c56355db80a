pub mod controller;
pub mod forms;
pub mod steps;
