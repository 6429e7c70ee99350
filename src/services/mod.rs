pub mod canonicalizer;
pub mod course_api;
pub mod grade_matrix;
pub mod grade_mutation;
pub mod gradebook_service;
pub mod source_collector;
pub mod student_grades;
pub mod submission_index;
