use crate::domain::user::User;
use crate::error::{LoyaltyError, Result};
use std::io::Read;

/// Reads `id,name,email` rows into users.
pub struct UserReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> UserReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    pub fn users(self) -> impl Iterator<Item = Result<User>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LoyaltyError::from))
    }
}
