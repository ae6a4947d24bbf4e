pub mod cashback_writer;
pub mod purchase_reader;
pub mod user_reader;
