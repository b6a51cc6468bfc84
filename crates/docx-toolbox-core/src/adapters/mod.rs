pub mod document;
pub mod excel_allinone;
pub mod excel_allinone_process;
pub(crate) mod fs_utils;
pub mod image_extract;
pub mod image_extract_process;
pub(crate) mod process_utils;
pub mod table_extract;
pub mod table_extract_process;

pub use document::{
    AdapterResult, DocumentAdapter, ItemOutcome, ensure_task_type, execute_validated,
};
pub use excel_allinone::{
    EXCEL_ALLINONE_SCRIPT, ExcelAllinoneAdapter, ExcelAllinoneSource, excel_allinone_request,
    predict_output_path,
};
pub use excel_allinone_process::ProcessExcelAllinoneSource;
pub use image_extract::{
    IMAGE_EXTRACT_SCRIPT, ImageExtractAdapter, ImageExtractSource, image_extract_request,
};
pub use image_extract_process::ProcessImageExtractSource;
pub use table_extract::{
    TABLE_EXTRACT_SCRIPT, TableExtractAdapter, TableExtractSource, TableExtraction,
    table_extract_request,
};
pub use table_extract_process::ProcessTableExtractSource;
