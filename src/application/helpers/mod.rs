pub mod recent_write_guard;
