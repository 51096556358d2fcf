mod common;
mod failure_tests;
mod scenario_tests;
