diesel::table! {
    tenants (id) {
        id -> Uuid,
        name -> Text,
        slug -> Text,
        plan -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        email -> Text,
        password_hash -> Text,
        display_name -> Text,
        role -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    api_tokens (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        user_id -> Uuid,
        name -> Text,
        token_hash -> Text,
        token_prefix -> Text,
        last_used_at -> Nullable<Timestamp>,
        revoked_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    bot_profiles (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        name -> Text,
        description -> Text,
        model -> Text,
        system_prompt -> Text,
        temperature -> Float8,
        max_tokens -> Int4,
        encrypted_credentials -> Nullable<Text>,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    sources (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        bot_profile_id -> Uuid,
        parent_source_id -> Nullable<Uuid>,
        name -> Text,
        description -> Text,
        source_type -> Text,
        status -> Text,
        content -> Nullable<Text>,
        config -> Text,
        refresh_schedule -> Text,
        last_refreshed_at -> Nullable<Timestamp>,
        last_error -> Nullable<Text>,
        document_count -> Int4,
        chunk_count -> Int4,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    documents (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        source_id -> Uuid,
        title -> Text,
        content -> Text,
        char_count -> Int4,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    chunks (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        document_id -> Uuid,
        source_id -> Uuid,
        bot_profile_id -> Uuid,
        ordinal -> Int4,
        content -> Text,
        vector_id -> Uuid,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    chats (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        bot_profile_id -> Uuid,
        user_id -> Uuid,
        title -> Text,
        message_count -> Int4,
        total_prompt_tokens -> Int8,
        total_completion_tokens -> Int8,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    messages (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        chat_id -> Uuid,
        role -> Text,
        content -> Text,
        prompt_tokens -> Int4,
        completion_tokens -> Int4,
        context_chunks -> Text,
        feedback -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    usage_events (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        chat_id -> Uuid,
        message_id -> Uuid,
        bot_profile_id -> Uuid,
        model -> Text,
        prompt_tokens -> Int4,
        completion_tokens -> Int4,
        is_stream -> Bool,
        time_to_first_token_ms -> Nullable<Int8>,
        stream_duration_ms -> Nullable<Int8>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    webhooks (id) {
        id -> Uuid,
        tenant_id -> Uuid,
        url -> Text,
        secret -> Text,
        events -> Text,
        description -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    jobs (id) {
        id -> Uuid,
        job_name -> Text,
        args -> Jsonb,
        status -> Text,
        run_at -> Timestamp,
        attempts -> Int4,
        last_error -> Nullable<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    tenants,
    users,
    api_tokens,
    bot_profiles,
    sources,
    documents,
    chunks,
    chats,
    messages,
    usage_events,
    webhooks,
    jobs,
);
