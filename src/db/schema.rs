diesel::table! {
    article_images (id) {
        id -> Int4,
        article_id -> Int4,
        image -> Text,
        date_created -> Timestamptz,
    }
}

diesel::table! {
    articles (id) {
        id -> Int4,
        author_id -> Int4,
        slug -> Text,
        title -> Varchar,
        description -> Varchar,
        body -> Text,
        is_published -> Bool,
        read_time -> Int4,
        date_created -> Timestamptz,
        date_modified -> Timestamptz,
    }
}

diesel::table! {
    bookmarks (id) {
        id -> Int4,
        user_id -> Int4,
        article_id -> Int4,
        article_title -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    comment_edits (id) {
        id -> Int4,
        comment_id -> Int4,
        body -> Text,
        edited_at -> Timestamptz,
    }
}

diesel::table! {
    comments (id) {
        id -> Int4,
        article_id -> Int4,
        user_id -> Int4,
        body -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    follows (id) {
        id -> Int4,
        follower_id -> Int4,
        followed_id -> Int4,
    }
}

diesel::table! {
    profiles (id) {
        id -> Int4,
        user_id -> Int4,
        bio -> Varchar,
        name -> Varchar,
        avatar -> Nullable<Text>,
    }
}

diesel::table! {
    reactions (id) {
        id -> Int4,
        user_id -> Int4,
        article_id -> Int4,
        polarity -> Int2,
    }
}

diesel::table! {
    users (id) {
        id -> Int4,
        username -> Varchar,
        email -> Text,
        password_hash -> Text,
        is_verified -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(article_images -> articles (article_id));
diesel::joinable!(articles -> users (author_id));
diesel::joinable!(bookmarks -> articles (article_id));
diesel::joinable!(bookmarks -> users (user_id));
diesel::joinable!(comment_edits -> comments (comment_id));
diesel::joinable!(comments -> articles (article_id));
diesel::joinable!(comments -> users (user_id));
diesel::joinable!(profiles -> users (user_id));
diesel::joinable!(reactions -> articles (article_id));
diesel::joinable!(reactions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    article_images,
    articles,
    bookmarks,
    comment_edits,
    comments,
    follows,
    profiles,
    reactions,
    users,
);
