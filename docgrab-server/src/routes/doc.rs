use crate::routes::{admin, health, index, tasks};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(info(
    title = "docgrab-server",
    description = "Submit a document URL, poll its extraction, download the PDF",
    version = "0.1.0"
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(index::IndexApi::openapi());
    root.merge(tasks::TasksApi::openapi());
    root.merge(health::HealthApi::openapi());
    root.merge(admin::AdminApi::openapi());
    root
}
