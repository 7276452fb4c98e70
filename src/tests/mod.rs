pub mod support;

mod cache_test;
mod queue_test;
