use std::error::Error as StdError;
use std::fmt;

/// A `Result` alias where `Err` case is `mongolog::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// The errors that may occur when talking to mongo through a [`Client`](crate::Client).
///
/// Note that [`LoggedCollection`](crate::LoggedCollection) never produces this type on its own,
/// it hands back whatever error the wrapped [`Collection`](crate::Collection) returned.
pub struct Error {
    inner: Box<Inner>,
}

pub(crate) type Source = Box<dyn StdError + Send + Sync>;

struct Inner {
    kind: Kind,
    source: Option<Source>,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(Inner { kind, source: None }),
        }
    }

    pub(crate) fn with<S: Into<Source>>(mut self, source: S) -> Error {
        self.inner.source = Some(source.into());
        self
    }

    /// Returns the kind of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use mongolog::ErrorKind;
    ///
    /// fn run() {
    ///     if let Err(e) = mongolog::Client::builder().uri("not a uri").build() {
    ///         match e.kind() {
    ///             ErrorKind::Builder => println!("we have a builder error..."),
    ///             _ => {},
    ///         }
    ///     }
    /// }
    /// ```
    pub fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// Creates a custom `Kind::InvalidArgument` error.
    ///
    /// This is useful when manually implementing the [`Collection`](crate::Collection) trait.
    pub fn invalid_argument<E: Into<Source>>(error: E) -> Error {
        Error::new(Kind::InvalidArgument).with(error)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = fmt.debug_struct("mongolog::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self.inner.kind {
            Kind::Builder => "builder error",
            Kind::InvalidArgument => "invalid argument",
            Kind::Mongodb => "mongodb error",
            Kind::Runtime => "runtime error",
            Kind::Unsupported => "unsupported method",
        };
        if let Some(ref source) = self.inner.source {
            write!(f, "{}: {}", desc, source)
        } else {
            f.write_str(desc)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

/// The `Kind` of `mongolog::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The `Client` could not be configured or started.
    Builder,
    /// An argument did not have the shape the method expects.
    InvalidArgument,
    /// The mongodb driver returned an error.
    Mongodb,
    /// The background runtime could not be reached.
    Runtime,
    /// The method name is not one the collection knows how to forward.
    Unsupported,
}

// Helpers
pub(crate) fn builder<E: Into<Source>>(e: E) -> Error {
    Error::new(Kind::Builder).with(e)
}

pub(crate) fn invalid_argument<E: Into<Source>>(e: E) -> Error {
    Error::invalid_argument(e)
}

pub(crate) fn mongodb<E: Into<Source>>(e: E) -> Error {
    Error::new(Kind::Mongodb).with(e)
}

pub(crate) fn runtime<E: Into<Source>>(e: E) -> Error {
    Error::new(Kind::Runtime).with(e)
}

pub(crate) fn unsupported<E: Into<Source>>(e: E) -> Error {
    Error::new(Kind::Unsupported).with(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_source() {
        let err = unsupported("collection.mapReduce");
        assert_eq!(err.to_string(), "unsupported method: collection.mapReduce");
        assert_eq!(*err.kind(), Kind::Unsupported);
    }

    #[test]
    fn display_without_source() {
        let err = Error::new(Kind::Runtime);
        assert_eq!(err.to_string(), "runtime error");
        assert!(err.source().is_none());
    }
}
