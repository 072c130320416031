diesel::table! {
    users (id) {
        id -> Uuid,
        username -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    companies (id) {
        id -> Uuid,
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    technicians (id) {
        id -> Uuid,
        company_id -> Uuid,
        user_id -> Nullable<Uuid>,
        first_name -> Varchar,
        last_name -> Varchar,
        email -> Varchar,
        phone_number -> Varchar,
        role -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    clients (id) {
        id -> Uuid,
        company_id -> Uuid,
        name -> Varchar,
        address -> Varchar,
        nip -> Varchar,
        regon -> Varchar,
        phone_number -> Varchar,
        email -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    manufacturers (id) {
        id -> Uuid,
        company_id -> Uuid,
        name -> Varchar,
    }
}

diesel::table! {
    fiscal_devices (id) {
        id -> Uuid,
        client_id -> Uuid,
        brand_id -> Uuid,
        model_name -> Varchar,
        unique_number -> Varchar,
        serial_number -> Varchar,
        sale_date -> Date,
        last_service_date -> Nullable<Date>,
        status -> Varchar,
        operating_instructions -> Text,
        remarks -> Text,
    }
}

diesel::table! {
    device_history (id) {
        id -> Uuid,
        device_id -> Uuid,
        action -> Varchar,
        description -> Text,
        actor_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    service_tickets (id) {
        id -> Uuid,
        company_id -> Uuid,
        client_id -> Uuid,
        device_id -> Uuid,
        assigned_technician_id -> Nullable<Uuid>,
        ticket_number -> Varchar,
        title -> Varchar,
        description -> Text,
        ticket_type -> Varchar,
        status -> Varchar,
        resolution -> Nullable<Varchar>,
        resolution_notes -> Text,
        scheduled_for -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        company_id -> Nullable<Uuid>,
        email -> Varchar,
        stripe_session_id -> Nullable<Varchar>,
        stripe_payment_intent -> Nullable<Varchar>,
        status -> Varchar,
        amount_cents -> Nullable<Int8>,
        currency -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    activation_codes (id) {
        id -> Uuid,
        order_id -> Uuid,
        code -> Varchar,
        email -> Nullable<Varchar>,
        used -> Bool,
        used_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
        expires_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    notification_jobs (id) {
        id -> Uuid,
        kind -> Varchar,
        payload -> Jsonb,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(technicians -> companies (company_id));
diesel::joinable!(clients -> companies (company_id));
diesel::joinable!(manufacturers -> companies (company_id));
diesel::joinable!(fiscal_devices -> clients (client_id));
diesel::joinable!(fiscal_devices -> manufacturers (brand_id));
diesel::joinable!(device_history -> fiscal_devices (device_id));
diesel::joinable!(service_tickets -> companies (company_id));
diesel::joinable!(service_tickets -> clients (client_id));
diesel::joinable!(service_tickets -> fiscal_devices (device_id));
diesel::joinable!(activation_codes -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    companies,
    technicians,
    clients,
    manufacturers,
    fiscal_devices,
    device_history,
    service_tickets,
    orders,
    activation_codes,
    notification_jobs,
);
