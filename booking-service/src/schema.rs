diesel::table! {
    bookings (id) {
        id -> Uuid,
        booking_reference -> Varchar,
        user_id -> Uuid,
        experience_id -> Uuid,
        slot_id -> Uuid,
        participants -> Int4,
        total_amount -> Numeric,
        currency -> Varchar,
        customer_name -> Varchar,
        customer_email -> Varchar,
        customer_phone -> Nullable<Varchar>,
        special_requests -> Nullable<Text>,
        status -> Varchar,
        payment_status -> Varchar,
        payment_intent_id -> Nullable<Varchar>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        cancelled_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    experiences (id) {
        id -> Uuid,
        title -> Varchar,
        price -> Numeric,
        currency -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    processed_payment_events (event_id) {
        event_id -> Uuid,
        booking_id -> Uuid,
        status -> Varchar,
        processed_at -> Timestamptz,
    }
}

diesel::table! {
    slots (id) {
        id -> Uuid,
        experience_id -> Uuid,
        slot_date -> Date,
        start_time -> Time,
        end_time -> Time,
        max_participants -> Int4,
        booked_participants -> Int4,
        is_available -> Bool,
        created_at -> Nullable<Timestamptz>,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(bookings -> experiences (experience_id));
diesel::joinable!(bookings -> slots (slot_id));

diesel::allow_tables_to_appear_in_same_query!(
    bookings,
    experiences,
    processed_payment_events,
    slots,
);
