//! Esquema Diesel. Reemplazable con `diesel print-schema`.

diesel::table! {
    artifacts (id) {
        id -> BigInt,
        stage_name -> Text,
        version -> BigInt,
        input_hash -> Text,
        data_hash -> Text,
        code_hash -> Text,
        config_hash -> Text,
        output_path -> Text,
        content_hash -> Text,
        row_count -> BigInt,
        created_at -> Text,
        status -> Text,
        run_id -> Nullable<Text>,
        metadata -> Text,
    }
}

diesel::table! {
    artifact_inputs (artifact_id, position) {
        artifact_id -> BigInt,
        position -> Integer,
        input_id -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(artifacts, artifact_inputs,);
