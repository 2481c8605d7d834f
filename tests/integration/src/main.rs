mod helpers;

mod precheck;
mod redis_dispatch;
mod sql_dispatch;
