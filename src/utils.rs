use crate::{Error, RecursiveError};

pub(crate) trait ErrorExt {
    fn error_on_cleanup(self, occuring_error: Error) -> Self;
}

impl ErrorExt for Error {
    fn error_on_cleanup(self, occuring_error: Error) -> Self {
        Error::RecursiveErrors(Box::new(RecursiveError {
            original_error: self,
            occuring_error,
        }))
    }
}
