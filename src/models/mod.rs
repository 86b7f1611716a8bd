mod article;
mod region;

pub use article::{Article, ArticleState, NewArticle, PublishMode};
pub use region::{parse_region_codes, RegionCatalog, RegionCode, RegionScope};
