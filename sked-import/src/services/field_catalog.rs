//! Target field catalog
//!
//! Fixed per-entity-type schema the column mapping resolver scores headers
//! against. Aliases are matched with the same similarity as the field name.

use crate::models::column_mapping::{EntityType, Transformation};

/// What kind of value a field holds (drives validation)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Code,
    Number,
    Time,
    DayOfWeek,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    /// Optional, but its absence produces a completeness warning
    pub important: bool,
    pub kind: FieldKind,
    pub aliases: &'static [&'static str],
}

const fn spec(
    name: &'static str,
    required: bool,
    important: bool,
    kind: FieldKind,
    aliases: &'static [&'static str],
) -> FieldSpec {
    FieldSpec {
        name,
        required,
        important,
        kind,
        aliases,
    }
}

use FieldKind::*;

const VENUE: &[FieldSpec] = &[
    spec("name", true, false, Text, &["room", "room name", "venue", "venue name", "location", "hall"]),
    spec("code", false, false, Code, &["room code", "venue code", "room number"]),
    spec("capacity", false, true, Number, &["seats", "size", "max capacity"]),
    spec("building", false, true, Text, &["block", "building name"]),
    spec("venue_type", false, false, Text, &["room type", "type"]),
];

const LECTURER: &[FieldSpec] = &[
    spec("name", true, false, Text, &["lecturer", "lecturer name", "teacher", "instructor", "staff name", "full name"]),
    spec("email", false, true, Email, &["email address", "e-mail", "mail"]),
    spec("staff_id", false, false, Code, &["staff number", "employee id"]),
    spec("department", false, true, Text, &["dept", "faculty"]),
    spec("phone", false, false, Text, &["phone number", "telephone", "mobile"]),
];

const COURSE: &[FieldSpec] = &[
    spec("code", true, false, Code, &["course code", "module code", "subject code"]),
    spec("name", true, false, Text, &["course name", "course title", "module name", "subject", "title"]),
    spec("credits", false, true, Number, &["credit hours", "units", "credit"]),
    spec("department", false, false, Text, &["dept", "faculty"]),
];

const STUDENT_GROUP: &[FieldSpec] = &[
    spec("name", true, false, Text, &["group", "group name", "class", "cohort", "student group", "section"]),
    spec("size", false, true, Number, &["group size", "students", "enrolment"]),
    spec("year", false, false, Text, &["year of study", "level"]),
    spec("programme", false, false, Text, &["program", "degree"]),
];

const SCHEDULE: &[FieldSpec] = &[
    spec("course_name", true, false, Text, &["course", "module", "subject name"]),
    spec("lecturer_name", true, false, Text, &["lecturer", "teacher", "instructor"]),
    spec("venue_name", true, false, Text, &["venue", "venue name", "room", "location"]),
    spec("day_of_week", true, false, DayOfWeek, &["day", "weekday"]),
    spec("start_time", true, false, Time, &["start", "from", "begins"]),
    spec("end_time", true, false, Time, &["end", "to", "finishes"]),
    spec("student_group", false, true, Text, &["group", "class", "cohort"]),
    spec("course_code", false, false, Code, &["code", "module code"]),
];

/// Fields of one entity type in catalog order
pub fn fields(entity_type: EntityType) -> &'static [FieldSpec] {
    match entity_type {
        EntityType::Venue => VENUE,
        EntityType::Lecturer => LECTURER,
        EntityType::Course => COURSE,
        EntityType::StudentGroup => STUDENT_GROUP,
        EntityType::Schedule => SCHEDULE,
    }
}

pub fn field(entity_type: EntityType, name: &str) -> Option<&'static FieldSpec> {
    fields(entity_type).iter().find(|f| f.name == name)
}

pub fn required_fields(entity_type: EntityType) -> impl Iterator<Item = &'static FieldSpec> {
    fields(entity_type).iter().filter(|f| f.required)
}

pub fn important_fields(entity_type: EntityType) -> impl Iterator<Item = &'static FieldSpec> {
    fields(entity_type).iter().filter(|f| f.important)
}

/// Deterministic transformation for a target field
pub fn infer_transformation(field_name: &str) -> Transformation {
    let name = field_name.to_lowercase();
    if name.contains("time") {
        Transformation::DateParse
    } else if ["capacity", "credits", "size"].iter().any(|n| name.contains(n)) {
        Transformation::NumberParse
    } else if name.ends_with("code") {
        Transformation::Uppercase
    } else if name.contains("email") {
        Transformation::Lowercase
    } else {
        Transformation::Trim
    }
}
