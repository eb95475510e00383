//! Create a new tower Service instance.
use tower::Service;

/// Builds one service per client request.
pub(crate) trait ServiceFactory<Request> {
    type Service: Service<Request>;

    fn create(&self) -> Self::Service;
}
