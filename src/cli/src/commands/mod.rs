pub mod cron;
pub mod dag;
pub mod task;
pub mod template;
pub mod worker;
