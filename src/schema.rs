// Written by hand to match the migrations in src/migrations.

diesel::table! {
    documents (id) {
        id -> Text,
        storage_ref -> Text,
        file_name -> Text,
        mime_type -> Text,
        category -> Text,
        farm_id -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    extraction_attempts (id) {
        id -> Text,
        document_id -> Text,
        status -> Text,
        stage -> Nullable<Text>,
        source -> Text,
        confidence -> Double,
        fields -> Text,
        field_sources -> Text,
        error_message -> Nullable<Text>,
        error_kind -> Nullable<Text>,
        failed_stage -> Nullable<Text>,
        retry_count -> Integer,
        force_ai -> Bool,
        low_content -> Bool,
        needs_review -> Bool,
        revision -> Integer,
        started_at -> Nullable<Text>,
        completed_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    review_records (id) {
        id -> Text,
        attempt_id -> Text,
        reviewer_id -> Text,
        original_data -> Text,
        corrected_data -> Text,
        notes -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    document_texts (document_id) {
        document_id -> Text,
        text -> Text,
        page_count -> Integer,
        tables -> Text,
        created_at -> Text,
    }
}

diesel::joinable!(extraction_attempts -> documents (document_id));
diesel::joinable!(review_records -> extraction_attempts (attempt_id));
diesel::joinable!(document_texts -> documents (document_id));

diesel::allow_tables_to_appear_in_same_query!(
    documents,
    extraction_attempts,
    review_records,
    document_texts,
);
